// Upload bookkeeping for interactive front ends. Each file selection takes a
// ticket; only the most recent ticket may replace the displayed chart.

use std::sync::Arc;

use tracing::debug;

use crate::config::ChartConfig;
use crate::hover::{HoverChart, HoverEvent, HoverState};
use crate::render::{build_chart, Chart};
use crate::{parse_csv, Dataset, SgError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadTicket {
    generation: u64,
}

impl UploadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, PartialEq)]
pub struct LoadedChart {
    pub generation: u64,
    pub dataset: Dataset,
    pub chart: Chart,
}

#[derive(Debug, Default)]
pub struct ChartSession {
    config: ChartConfig,
    latest: u64,
    current: Option<Arc<LoadedChart>>,
    last_error: Option<SgError>,
    hover: HoverState,
}

impl ChartSession {
    pub fn new(config: ChartConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ChartConfig {
        &self.config
    }

    pub fn begin_upload(&mut self) -> UploadTicket {
        self.latest += 1;
        UploadTicket {
            generation: self.latest,
        }
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest
    }

    /// Parse and lay out `text` for `ticket`. A ticket that is no longer the
    /// latest is rejected with `StaleUpload` and leaves the session untouched.
    /// A failed latest upload clears the displayed chart.
    pub fn complete_upload(
        &mut self,
        ticket: UploadTicket,
        text: &str,
    ) -> Result<Arc<LoadedChart>, SgError> {
        if ticket.generation != self.latest {
            debug!(
                generation = ticket.generation,
                latest = self.latest,
                "discarding stale upload"
            );
            return Err(SgError::StaleUpload {
                generation: ticket.generation,
                latest: self.latest,
            });
        }

        self.hover = HoverState::Hidden;
        let loaded = parse_csv(text).and_then(|dataset| {
            let chart = build_chart(&dataset, &self.config)?;
            Ok(LoadedChart {
                generation: ticket.generation,
                dataset,
                chart,
            })
        });
        match loaded {
            Ok(loaded) => {
                let loaded = Arc::new(loaded);
                self.current = Some(Arc::clone(&loaded));
                self.last_error = None;
                debug!(generation = ticket.generation, "upload displayed");
                Ok(loaded)
            }
            Err(err) => {
                self.current = None;
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    pub fn current(&self) -> Option<Arc<LoadedChart>> {
        self.current.clone()
    }

    pub fn last_error(&self) -> Option<&SgError> {
        self.last_error.as_ref()
    }

    pub fn hover(&self) -> &HoverState {
        &self.hover
    }

    /// Apply a hover event. Without a displayed chart, or for a key the chart
    /// does not have, the panel stays hidden.
    pub fn handle_hover(&mut self, event: &HoverEvent) -> &HoverState {
        let known = match (event, &self.current) {
            (HoverEvent::Leave, _) => true,
            (HoverEvent::Enter { key, .. }, Some(loaded)) => loaded.chart.shape(key).is_some(),
            (HoverEvent::Enter { .. }, None) => false,
        };
        self.hover = if known {
            self.hover.apply(event, &self.config.hover)
        } else {
            HoverState::Hidden
        };
        &self.hover
    }

    /// Bar chart for the hovered category, if the panel is visible.
    pub fn hover_chart(&self) -> Option<HoverChart> {
        let HoverState::Visible { key, color, .. } = &self.hover else {
            return None;
        };
        let loaded = self.current.as_ref()?;
        Some(HoverChart::build(&loaded.dataset, key, color, &self.config.hover))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE_A: &str = "Date,A\n2024-01-01,1\n2024-02-01,2\n";
    const FILE_B: &str = "Date,B,C\n2024-01-01,5,6\n";

    #[test]
    fn latest_upload_wins_regardless_of_completion_order() {
        let mut session = ChartSession::new(ChartConfig::default());
        let a = session.begin_upload();
        let b = session.begin_upload();

        let shown = session.complete_upload(b, FILE_B).unwrap();
        assert_eq!(shown.generation, 2);

        let stale = session.complete_upload(a, FILE_A).unwrap_err();
        assert_eq!(
            stale,
            SgError::StaleUpload {
                generation: 1,
                latest: 2
            }
        );
        let current = session.current().unwrap();
        assert_eq!(current.dataset.keys, vec!["B", "C"]);
        assert_eq!(current.generation, 2);
    }

    #[test]
    fn failed_latest_upload_clears_chart() {
        let mut session = ChartSession::new(ChartConfig::default());
        let first = session.begin_upload();
        session.complete_upload(first, FILE_A).unwrap();
        assert!(session.current().is_some());

        let second = session.begin_upload();
        let err = session
            .complete_upload(second, "Date,A\n2024-01-01,oops\n")
            .unwrap_err();
        assert!(matches!(err, SgError::Parse(_)));
        assert!(session.current().is_none());
        assert_eq!(session.last_error(), Some(&err));

        let third = session.begin_upload();
        assert_eq!(
            session.complete_upload(third, "Date,A\n").unwrap_err(),
            SgError::EmptyDataset
        );
    }

    #[test]
    fn hover_follows_loaded_chart() {
        let mut session = ChartSession::new(ChartConfig::default());
        let enter = HoverEvent::Enter {
            key: "A".into(),
            color: "#e41a1c".into(),
            pointer: (200.0, 100.0),
        };
        assert!(!session.handle_hover(&enter).is_visible());

        let ticket = session.begin_upload();
        session.complete_upload(ticket, FILE_A).unwrap();
        assert!(session.handle_hover(&enter).is_visible());
        let chart = session.hover_chart().unwrap();
        assert_eq!(chart.bars.len(), 2);
        assert_eq!(chart.color, "#e41a1c");

        let unknown = HoverEvent::Enter {
            key: "Z".into(),
            color: "#000".into(),
            pointer: (0.0, 0.0),
        };
        assert!(!session.handle_hover(&unknown).is_visible());

        session.handle_hover(&enter);
        let ticket = session.begin_upload();
        session.complete_upload(ticket, FILE_A).unwrap();
        assert_eq!(session.hover(), &HoverState::Hidden);
        assert!(session.hover_chart().is_none());
    }

    #[test]
    fn stale_upload_leaves_hover_alone() {
        let mut session = ChartSession::new(ChartConfig::default());
        let older = session.begin_upload();
        let newer = session.begin_upload();
        session.complete_upload(newer, FILE_A).unwrap();

        let enter = HoverEvent::Enter {
            key: "A".into(),
            color: "#e41a1c".into(),
            pointer: (200.0, 100.0),
        };
        session.handle_hover(&enter);
        assert!(session
            .complete_upload(older, FILE_B)
            .is_err_and(|err| matches!(err, SgError::StaleUpload { .. })));
        assert_eq!(session.hover().key(), Some("A"));
        assert!(session.hover_chart().is_some());
    }
}
