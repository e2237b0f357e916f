use std::fmt;

/// A mutual-exclusion key. Tasks sharing a resource never run concurrently;
/// the scheduler serializes them FIFO.
///
/// `kind` names the resource class (`"ENTITY"`, `"REPORT"`); `value` is the
/// specific instance (an entity id, a [`dm_types::ReportKey`] rendered to
/// its canonical string).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub kind: String,
    pub value: String,
}

impl Resource {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn entity(entity_id: impl fmt::Display) -> Self {
        Self::new("ENTITY", entity_id.to_string())
    }

    pub fn report(report_key: impl fmt::Display) -> Self {
        Self::new("REPORT", report_key.to_string())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}
