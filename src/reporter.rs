use crate::events::Event;

/// Aggregates events and produces human or JSON-lines output.
pub struct Reporter {
    events: Vec<Event>,
    json_mode: bool,
}

impl Reporter {
    pub fn new(json_mode: bool) -> Self {
        Self {
            events: Vec::new(),
            json_mode,
        }
    }

    pub fn record(&mut self, event: Event) {
        if self.json_mode
            && let Ok(line) = serde_json::to_string(&event)
        {
            println!("{}", line);
        }
        self.events.push(event);
    }

    /// Human-readable closing summary for the last recorded RunSummary.
    pub fn summary_line(&self) -> Option<String> {
        self.events.iter().rev().find_map(|e| match e {
            Event::RunSummary {
                completed,
                failed,
                skipped,
                remaining,
                log_path,
            } => Some(format!(
                "{} completed, {} failed, {} skipped, {} remaining (log: {})",
                completed,
                failed,
                skipped,
                remaining,
                log_path.display()
            )),
            _ => None,
        })
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}
