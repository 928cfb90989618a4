use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("Check execution failed: {0}")]
    CheckExecution(String),

    #[error("{tool} exited with code {}: {output}", exit_code(.code))]
    ExternalTool {
        tool: String,
        code: Option<u32>,
        output: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Argument error: {0}")]
    ArgumentError(String),

    #[error("Remote execution error: {0}")]
    RemoteConnectionError(#[from] rustrc::Error),
}

impl Error {
    /// Operator facing next step for this failure.
    pub fn hint(&self) -> &'static str {
        match self {
            Error::Authentication(_) => {
                "Run 'az login' and confirm the account can see at least one subscription"
            }
            Error::InvalidSelection(_) => "Enter one of the listed numbers",
            Error::DeviceUnreachable(_) => {
                "Verify DNS resolution, firewall rules and that WinRM or SSH is enabled on the device"
            }
            Error::ExternalTool { .. } => {
                "Re-run the command manually on the device and review its output"
            }
            Error::Io(_) => "Check that the path exists and is writable",
            Error::ArgumentError(_) => "Run with --help to see the accepted arguments",
            Error::RemoteConnectionError(_) => {
                "Check the remote credentials and that the device accepts remote PowerShell"
            }
            _ => "Review the log file for details",
        }
    }
}

pub(crate) fn exit_code(code: &Option<u32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

pub type Result<T> = std::result::Result<T, Error>;
