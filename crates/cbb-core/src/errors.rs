/// Core error type for the certbot bot.
///
/// Adapter crates map their specific errors into this type so the plugin core
/// can report failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The external command ran to completion but exited with a nonzero code.
    #[error("{program} exited with code {code}{}", stderr_suffix(.stderr))]
    Command {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("external error: {0}")]
    External(String),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!("\nstderr (tail):\n{stderr}")
    }
}

impl Error {
    /// Exit code of a failed external command, if this is one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Command { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
