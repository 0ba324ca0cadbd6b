use crate::phase::Phase;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation was invoked outside the one phase it is legal in. This
    /// is a programming error in a transformer, not a condition to retry.
    #[error("`{op}` is not legal during the {phase:?} phase")]
    PhaseViolation { op: &'static str, phase: Phase },

    /// A write targeted a class other than the one currently being written.
    #[error("write targets `{target}` while `{current}` is being written")]
    WrongClass { target: String, current: String },

    /// A structural or gate error from the tree model, including mutation
    /// attempts while the gate is closed.
    #[error(transparent)]
    Tree(#[from] classtree::TreeError),

    /// The round or write dependency graph could not be drained.
    #[error("transformer dependencies form a cycle through {0:?}")]
    CyclicDependency(Vec<String>),

    #[error("no class `{0}` has been added to the processor")]
    UnknownClass(String),

    /// Writes need a target that can be resolved later; copy captures are
    /// snapshots and cannot be written through.
    #[error("writes take reference captures, this target is a copy")]
    InvalidCaptureTarget,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// The platform could not supply bytecode for a subtype query.
    #[error("no bytecode for `{0}` is available on the platform")]
    TypeNotPresent(String),
}

pub type Result<T> = std::result::Result<T, Error>;
