/// How a sequence starts draining once steps are appended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Launch {
    /// The first append schedules the drain on the current `LocalSet`
    /// (`tokio::task::spawn_local`), so handlers can still be bound before the
    /// first step runs.
    #[default]
    Deferred,
    /// Nothing runs until `finish` is called. Usable outside a `LocalSet`, and
    /// required for a prebuilt sequence that is used as a step.
    Manual,
}

/// What happens to a step failure that nothing handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Halt the sequence and report the failure through its completion.
    #[default]
    Report,
    /// Panic from the scheduling call stack.
    Panic,
}

/// Per-sequence settings.
#[derive(Debug, Clone, Default)]
pub struct SequenceConfig {
    pub name: Option<String>,
    pub launch: Launch,
    pub on_fatal: FatalPolicy,
}

impl SequenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label used in log lines and errors instead of the generated id.
    pub fn name(self, name: impl Into<String>) -> Self {
        SequenceConfig {
            name: Some(name.into()),
            ..self
        }
    }

    pub fn launch(self, launch: Launch) -> Self {
        SequenceConfig { launch, ..self }
    }

    pub fn on_fatal(self, on_fatal: FatalPolicy) -> Self {
        SequenceConfig { on_fatal, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SequenceConfig::new();
        assert!(config.name.is_none());
        assert_eq!(config.launch, Launch::Deferred);
        assert_eq!(config.on_fatal, FatalPolicy::Report);
    }

    #[test]
    fn test_builder_keeps_earlier_settings() {
        let config = SequenceConfig::new()
            .name("touch")
            .launch(Launch::Manual)
            .on_fatal(FatalPolicy::Panic);

        assert_eq!(config.name.as_deref(), Some("touch"));
        assert_eq!(config.launch, Launch::Manual);
        assert_eq!(config.on_fatal, FatalPolicy::Panic);
    }
}
