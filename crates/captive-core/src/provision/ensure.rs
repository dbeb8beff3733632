// ── Lookup-before-write ──
//
// Every topology object is found by the attributes that identify it within
// its class. Absent objects are added; present ones are patched only with
// the attributes that drifted.

use crate::error::CoreError;
use crate::session::Session;

use super::report::StepStatus;

/// Idempotent upsert of one device object.
#[derive(Debug, Clone)]
pub(crate) struct Ensure {
    class: &'static str,
    key: Vec<(String, String)>,
    attrs: Vec<(String, String)>,
    on_add: Vec<(String, String)>,
}

impl Ensure {
    pub(crate) fn new(class: &'static str) -> Self {
        Self {
            class,
            key: Vec::new(),
            attrs: Vec::new(),
            on_add: Vec::new(),
        }
    }

    /// Identifying attribute; used as a query filter and set on add.
    pub(crate) fn key(mut self, key: &str, value: impl Into<String>) -> Self {
        self.key.push((key.to_owned(), value.into()));
        self
    }

    /// Managed attribute; corrected when it drifts.
    pub(crate) fn attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attrs.push((key.to_owned(), value.into()));
        self
    }

    /// Attribute sent only when the object is created.
    pub(crate) fn on_add(mut self, key: &str, value: impl Into<String>) -> Self {
        self.on_add.push((key.to_owned(), value.into()));
        self
    }

    pub(crate) async fn run(self, session: &mut Session) -> Result<StepStatus, CoreError> {
        let filters = pairs(&self.key);
        let existing = session.print(self.class, &filters).await?;

        let Some(current) = existing.first() else {
            let all: Vec<(&str, &str)> = self
                .key
                .iter()
                .chain(&self.attrs)
                .chain(&self.on_add)
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            session.add(self.class, &all).await?;
            return Ok(StepStatus::Created);
        };

        let drift: Vec<(&str, &str)> = self
            .attrs
            .iter()
            .filter(|(k, v)| current.get(k).map(normalize) != Some(normalize(v)))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if drift.is_empty() {
            return Ok(StepStatus::Unchanged);
        }

        let id = current.id().ok_or_else(|| {
            CoreError::Internal(format!("{} record without .id", self.class))
        })?;
        session.set(self.class, id, &drift).await?;
        Ok(StepStatus::Updated)
    }
}

pub(crate) fn pairs(owned: &[(String, String)]) -> Vec<(&str, &str)> {
    owned.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

/// The device prints booleans as `true`/`false` but accepts `yes`/`no`.
fn normalize(value: &str) -> &str {
    match value {
        "yes" | "true" => "true",
        "no" | "false" => "false",
        other => other,
    }
}
