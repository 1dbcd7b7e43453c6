use docfeed_api::ChangeEvent;

/// Receives every decoded change event, in feed order.
pub trait ChangeObserver: Send {
    fn observe(&mut self, event: &ChangeEvent);
}

impl<F> ChangeObserver for F
where
    F: FnMut(&ChangeEvent) + Send,
{
    fn observe(&mut self, event: &ChangeEvent) {
        self(event)
    }
}

/// Per-kind event counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventTally {
    pub inserts: u64,
    pub updates: u64,
    pub other: u64,
}

impl EventTally {
    pub fn total(&self) -> u64 {
        self.inserts + self.updates + self.other
    }
}

impl ChangeObserver for EventTally {
    fn observe(&mut self, event: &ChangeEvent) {
        match event {
            ChangeEvent::Insert(_) => self.inserts += 1,
            ChangeEvent::Update(_) => self.updates += 1,
            ChangeEvent::Other(_) => self.other += 1,
        }
    }
}

/// Emits one structured `change stream record` per event.
#[derive(Debug, Default)]
pub struct LogObserver {
    tally: EventTally,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self) -> EventTally {
        self.tally
    }
}

impl ChangeObserver for LogObserver {
    fn observe(&mut self, event: &ChangeEvent) {
        self.tally.observe(event);
        let id = event.id().map(ToString::to_string).unwrap_or_default();
        tracing::info!(
            operation = event.operation(),
            id = %id,
            record = %event.to_json(),
            "change stream record"
        );
    }
}
