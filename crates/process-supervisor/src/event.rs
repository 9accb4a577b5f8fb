//! Raw process events produced by a launched process

/// A raw event from a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    /// The type of event
    pub event_type: ProcessEventType,
    /// Output line carried by `Stdout` and `Stderr` events
    pub data: Option<String>,
}

impl ProcessEvent {
    /// Create a new process event
    pub fn new(event_type: ProcessEventType) -> Self {
        Self {
            event_type,
            data: None,
        }
    }

    /// Create an output line event for the given source
    pub fn line(source: LogSource, line: String) -> Self {
        let event_type = match source {
            LogSource::Stdout => ProcessEventType::Stdout,
            LogSource::Stderr => ProcessEventType::Stderr,
        };
        Self {
            event_type,
            data: Some(line),
        }
    }
}

/// Types of raw process events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventType {
    /// Process has started
    Started {
        /// OS process id
        pid: u32,
    },
    /// Log line from stdout
    Stdout,
    /// Log line from stderr
    Stderr,
}

/// Source of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_event_carries_source() {
        let out = ProcessEvent::line(LogSource::Stderr, "dial tcp: refused".to_string());
        assert_eq!(out.event_type, ProcessEventType::Stderr);
        assert_eq!(out.data.as_deref(), Some("dial tcp: refused"));

        let started = ProcessEvent::new(ProcessEventType::Started { pid: 7 });
        assert_eq!(started.data, None);
    }
}
