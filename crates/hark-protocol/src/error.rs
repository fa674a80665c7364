//! Error types for the skill session protocol.

use crate::ports::ResourceCategory;
use thiserror::Error;

/// Failure to compile an action list. Fatal to the compile call: no
/// partial list is ever produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("resource not found: {name} ({category})")]
    ResourceNotFound {
        name: String,
        category: ResourceCategory,
    },
    #[error("dialog template not found: {0}")]
    TemplateNotFound(String),
    #[error("failed rendering dialog {template}: {reason}")]
    TemplateRender { template: String, reason: String },
}

/// Errors raised by a bus transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus closed")]
    Closed,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

/// Errors that can occur while serving skill requests.
#[derive(Debug, Error)]
pub enum SkillError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("settings error: {0}")]
    Settings(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Convenience result type for skill operations.
pub type SkillResult<T> = Result<T, SkillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_not_found_names_category() {
        let err = CompileError::ResourceNotFound {
            name: "timer.qml".into(),
            category: ResourceCategory::Ui,
        };
        assert_eq!(err.to_string(), "resource not found: timer.qml (ui)");
    }

    #[test]
    fn category_in_errors_matches_its_directory() {
        let err = CompileError::ResourceNotFound {
            name: "beep.wav".into(),
            category: ResourceCategory::Sound,
        };
        assert_eq!(err.to_string(), "resource not found: beep.wav (sounds)");
        assert_eq!(
            ResourceCategory::Sound.to_string(),
            ResourceCategory::Sound.dir_name()
        );
    }

    #[test]
    fn compile_error_converts_into_skill_error() {
        let err: SkillError = CompileError::TemplateNotFound("greet".into()).into();
        assert!(matches!(err, SkillError::Compile(_)));
    }
}
