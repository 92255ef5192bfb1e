use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum DryBoxError {
    // ---
    /// Adapter threw, returned a wrong shape, or violated its declared
    /// capabilities. Fatal: the run terminates with exit code 3.
    #[error("endpoint error: {0}")]
    Endpoint(String),

    /// Malformed or out-of-range scenario material, unknown bearer /
    /// channel / vocoder kind, or invalid key material. Exit code 4.
    #[error("invalid scenario: {0}")]
    Scenario(String),

    /// Post-run acceptance check failed. Exit code 2.
    #[error("acceptance check failed: {0}")]
    Acceptance(String),

    /// SDU too large to segment: more than 256 fragments would be needed.
    #[error("SDU of {sdu_len} bytes exceeds 256 fragments at MTU {mtu}")]
    OversizeSdu { sdu_len: usize, mtu: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

impl DryBoxError {
    /// Process exit code for this error.
    ///
    /// `0` success, `2` acceptance failure, `3` endpoint error, `4` invalid
    /// scenario. I/O failures surface as endpoint-class failures (3): they
    /// occur while the kernel is driving a run, never at the scenario
    /// boundary.
    pub fn exit_code(&self) -> i32 {
        // ---
        match self {
            DryBoxError::Acceptance(_) => 2,
            DryBoxError::Endpoint(_) => 3,
            DryBoxError::OversizeSdu { .. } => 3,
            DryBoxError::Scenario(_) => 4,
            DryBoxError::Io(_) => 3,
        }
    }
}

// ---

pub type Result<T> = std::result::Result<T, DryBoxError>;
