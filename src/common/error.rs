pub type Result<T> = std::result::Result<T, ErdError>;

#[derive(Debug, thiserror::Error)]
pub enum ErdError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize diagram: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown entity `{name}` referenced by {referrer}")]
    UnknownEntity { name: String, referrer: String },

    #[error("duplicate entity name `{name}`")]
    DuplicateEntity { name: String },

    #[error("entity `{name}` cannot be nested under `{parent}`: the chain loops back")]
    CyclicParent { name: String, parent: String },

    #[error("xor group {index} of entity `{entity}` needs at least two legs, found {found}")]
    InvalidXorGroup {
        entity: String,
        index: usize,
        found: usize,
    },
}
