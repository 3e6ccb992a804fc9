use crate::config::SpecializerConfig;
use crate::diagnostics::{ConsoleDiagnosticHandler, DiagnosticHandler};
use crate::expr::{DefaultExpressionParser, ExpressionParser};
use crate::watchdog::CancelFlag;
use std::sync::Arc;

/// Dependency injection container
/// Manages all shared dependencies and creates instances with proper wiring
pub struct Container {
    config: Arc<SpecializerConfig>,
    diagnostic_handler: Arc<dyn DiagnosticHandler>,
    parser: Arc<dyn ExpressionParser>,
    cancel: Option<CancelFlag>,
}

impl Container {
    /// Create a new container with production dependencies
    pub fn new(config: SpecializerConfig) -> Self {
        let config = Arc::new(config);

        let diagnostic_handler = Arc::new(ConsoleDiagnosticHandler::new(config.pretty));

        let parser = Arc::new(DefaultExpressionParser);

        Container {
            config,
            diagnostic_handler,
            parser,
            cancel: None,
        }
    }

    /// Create a container with custom dependencies (for testing)
    pub fn with_dependencies(
        config: SpecializerConfig,
        diagnostic_handler: Arc<dyn DiagnosticHandler>,
        parser: Arc<dyn ExpressionParser>,
    ) -> Self {
        let config = Arc::new(config);

        Container {
            config,
            diagnostic_handler,
            parser,
            cancel: None,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Arc<SpecializerConfig> {
        &self.config
    }

    /// Get the diagnostic handler
    pub fn diagnostic_handler(&self) -> &Arc<dyn DiagnosticHandler> {
        &self.diagnostic_handler
    }

    /// Get the expression parser
    pub fn parser(&self) -> &Arc<dyn ExpressionParser> {
        &self.parser
    }

    /// Stop long-running work once `flag` is raised
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn cancel_flag(&self) -> Option<&CancelFlag> {
        self.cancel.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(CancelFlag::is_set).unwrap_or(false)
    }

    /// Check if any errors have been reported
    pub fn has_errors(&self) -> bool {
        self.diagnostic_handler.has_errors()
    }

    /// Get the error count
    pub fn error_count(&self) -> usize {
        self.diagnostic_handler.error_count()
    }

    /// Get the warning count
    pub fn warning_count(&self) -> usize {
        self.diagnostic_handler.warning_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use crate::errors::Location;
    use crate::data::Token;
    use crate::expr::{Expr, ExprError};

    #[test]
    fn test_container_creation() {
        let config = SpecializerConfig::default();
        let container = Container::new(config);

        assert_eq!(container.error_count(), 0);
        assert!(!container.has_errors());
    }

    #[test]
    fn test_container_with_collecting_handler() {
        let config = SpecializerConfig::default();
        let diagnostics = Arc::new(CollectingDiagnosticHandler::new());

        let container =
            Container::with_dependencies(config, diagnostics.clone(), Arc::new(DefaultExpressionParser));

        container
            .diagnostic_handler()
            .error(Location::component(".top"), "Test error");

        assert!(container.has_errors());
        assert_eq!(container.error_count(), 1);
        assert_eq!(diagnostics.get_diagnostics()[0].message, "Test error");
    }

    #[test]
    fn test_container_config_access() {
        let config = SpecializerConfig {
            iterations: Some(7),
            ..SpecializerConfig::default()
        };

        let container = Container::new(config);

        assert_eq!(container.config().iterations, Some(7));
    }

    /// A dialect in which every expression means 1.
    struct OnesParser;

    impl ExpressionParser for OnesParser {
        fn parse(&self, _source: &str) -> Result<Expr, ExprError> {
            Ok(Expr::Literal(Token::int(1)))
        }
    }

    #[test]
    fn test_parser_is_replaceable() {
        let container = Container::with_dependencies(
            SpecializerConfig::default(),
            Arc::new(CollectingDiagnosticHandler::new()),
            Arc::new(OnesParser),
        );
        let parsed = container.parser().parse("a * 2 + 3").unwrap();
        assert!(parsed.free_variables().is_empty());
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let container = Container::new(SpecializerConfig::default()).with_cancel_flag(flag.clone());
        assert!(!container.is_cancelled());
        flag.set();
        assert!(container.is_cancelled());
    }
}
