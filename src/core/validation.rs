/// An issue found while composing a wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// The wire cannot run.
    Error(String),
    /// The wire can run but likely does not do what its author meant.
    Warning(String),
}

/// Non-fatal findings collected during a composition pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Error(msg.into()));
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Warning(msg.into()));
    }

    pub fn is_safe(&self) -> bool {
        !self.issues.iter().any(|i| matches!(i, ValidationIssue::Error(_)))
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| matches!(i, ValidationIssue::Warning(_)))
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|i| match i {
            ValidationIssue::Warning(msg) => Some(msg.as_str()),
            ValidationIssue::Error(_) => None,
        })
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }

    /// Logs every issue under the wire's name.
    pub fn log_summary(&self, wire: &str) {
        for issue in &self.issues {
            match issue {
                ValidationIssue::Error(msg) => log::error!("wire {wire}: {msg}"),
                ValidationIssue::Warning(msg) => log::warn!("wire {wire}: {msg}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_make_a_result_unsafe() {
        let mut result = ValidationResult::new();
        result.add_warning("shadows mesh variable limit");
        assert!(result.is_safe());
        assert!(result.has_warnings());
        assert_eq!(result.warnings().collect::<Vec<_>>(), ["shadows mesh variable limit"]);

        let mut other = ValidationResult::new();
        other.add_error("broken");
        result.merge(other);
        assert!(!result.is_safe());
    }
}
