use std::{fmt, str::FromStr};

use derive_more::Display;

/// One of the five pre-aggregated statistic families the mart maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ReportFamily {
    /// Data-source summary: `DSS`.
    #[display("DSS")]
    DataSourceSummary,
    /// Cross-source summary: `CSS`.
    #[display("CSS")]
    CrossSourceSummary,
    /// Entity-size breakdown: `ESB`.
    #[display("ESB")]
    EntitySizeBreakdown,
    /// Entity-relation breakdown: `ERB`.
    #[display("ERB")]
    EntityRelationBreakdown,
}

#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum ReportKeyParseError {
    #[display("report key is missing the `statistic:data_source1:data_source2` segments")]
    MissingSegments,
    #[display("unrecognized report family tag {_0:?}")]
    UnknownFamily(#[error(not(source))] String),
}

impl ReportFamily {
    const fn tag(self) -> &'static str {
        match self {
            Self::DataSourceSummary => "DSS",
            Self::CrossSourceSummary => "CSS",
            Self::EntitySizeBreakdown => "ESB",
            Self::EntityRelationBreakdown => "ERB",
        }
    }

    /// The scheduler action name a report handler for this family is
    /// registered under, e.g. `UPDATE_DATA_SOURCE_SUMMARY`. Shared by the
    /// refresh-entity handler (which schedules these as follow-ups) and
    /// the report-follow-up loop (which re-schedules them from the
    /// ledger's recovery set).
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::DataSourceSummary => "UPDATE_DATA_SOURCE_SUMMARY",
            Self::CrossSourceSummary => "UPDATE_CROSS_SOURCE_SUMMARY",
            Self::EntitySizeBreakdown => "UPDATE_ENTITY_SIZE_BREAKDOWN",
            Self::EntityRelationBreakdown => "UPDATE_ENTITY_RELATION_BREAKDOWN",
        }
    }

    /// Every report family, for registering one handler per action at
    /// startup.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self::DataSourceSummary,
            Self::CrossSourceSummary,
            Self::EntitySizeBreakdown,
            Self::EntityRelationBreakdown,
        ]
    }

    fn parse_tag(tag: &str) -> Result<Self, ReportKeyParseError> {
        match tag {
            "DSS" => Ok(Self::DataSourceSummary),
            "CSS" => Ok(Self::CrossSourceSummary),
            "ESB" => Ok(Self::EntitySizeBreakdown),
            "ERB" => Ok(Self::EntityRelationBreakdown),
            other => Err(ReportKeyParseError::UnknownFamily(other.to_owned())),
        }
    }
}

/// Canonical identifier of one report statistic row: `REPORT:statistic:data_source1:data_source2`.
///
/// Any field absent for a given family is the empty string, never omitted —
/// this keeps the four-segment shape fixed so parsing is total over its own
/// output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportKey {
    pub report: ReportFamily,
    pub statistic: String,
    pub data_source1: String,
    pub data_source2: String,
}

impl ReportKey {
    #[must_use]
    pub fn data_source_summary(data_source: impl Into<String>) -> Self {
        Self {
            report: ReportFamily::DataSourceSummary,
            statistic: String::new(),
            data_source1: data_source.into(),
            data_source2: String::new(),
        }
    }

    /// A cross-source key for an unordered pair, including the same-source case.
    #[must_use]
    pub fn cross_source_summary(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        let (data_source1, data_source2) = if a <= b { (a, b) } else { (b, a) };
        Self {
            report: ReportFamily::CrossSourceSummary,
            statistic: String::new(),
            data_source1,
            data_source2,
        }
    }

    #[must_use]
    pub fn entity_size_breakdown(size: u32) -> Self {
        Self {
            report: ReportFamily::EntitySizeBreakdown,
            statistic: size.to_string(),
            data_source1: String::new(),
            data_source2: String::new(),
        }
    }

    #[must_use]
    pub fn entity_relation_breakdown(related_count: u32) -> Self {
        Self {
            report: ReportFamily::EntityRelationBreakdown,
            statistic: related_count.to_string(),
            data_source1: String::new(),
            data_source2: String::new(),
        }
    }

    /// The scheduler action the report handler for this key's family is
    /// registered under.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        self.report.action()
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.report.tag(),
            self.statistic,
            self.data_source1,
            self.data_source2
        )
    }
}

impl FromStr for ReportKey {
    type Err = ReportKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, ':');
        let tag = parts.next().unwrap_or_default();
        let report = ReportFamily::parse_tag(tag)?;

        let statistic = parts.next().ok_or(ReportKeyParseError::MissingSegments)?;
        let data_source1 = parts.next().ok_or(ReportKeyParseError::MissingSegments)?;
        let data_source2 = parts.next().ok_or(ReportKeyParseError::MissingSegments)?;

        Ok(Self {
            report,
            statistic: statistic.to_owned(),
            data_source1: data_source1.to_owned(),
            data_source2: data_source2.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_family() {
        let keys = [
            ReportKey::data_source_summary("CUSTOMERS"),
            ReportKey::cross_source_summary("CUSTOMERS", "WATCHLIST"),
            ReportKey::cross_source_summary("WATCHLIST", "CUSTOMERS"),
            ReportKey::entity_size_breakdown(3),
            ReportKey::entity_relation_breakdown(0),
        ];
        for key in keys {
            let text = key.to_string();
            let parsed: ReportKey = text.parse().expect("canonical form must parse");
            assert_eq!(parsed, key);
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn cross_source_is_order_independent() {
        assert_eq!(
            ReportKey::cross_source_summary("A", "B"),
            ReportKey::cross_source_summary("B", "A")
        );
    }

    #[test]
    fn rejects_unknown_family() {
        assert!(matches!(
            "XYZ:::".parse::<ReportKey>(),
            Err(ReportKeyParseError::UnknownFamily(_))
        ));
    }

    #[test]
    fn rejects_missing_segments() {
        assert!(matches!(
            "DSS".parse::<ReportKey>(),
            Err(ReportKeyParseError::MissingSegments)
        ));
    }
}
