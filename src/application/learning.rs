use crate::domain::matcher::{weekly_segments, Span};
use crate::domain::models::ParticipantEvent;
use crate::infrastructure::config::LearningSettings;
use crate::infrastructure::schedule_repository::TemplateDraft;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    available: u32,
    unavailable: u32,
}

impl Tally {
    fn total(self) -> u32 {
        self.available + self.unavailable
    }
}

/// Derives learned weekly templates from answer history.
///
/// Answers are grouped by the weekday and minute range of their date. Dates
/// spanning midnight are ignored. A group becomes a template once it has
/// `min_samples` answers and its majority reaches `min_agreement`; ties
/// resolve to unavailable.
pub fn derive_learned_templates(
    history: &[ParticipantEvent],
    settings: &LearningSettings,
) -> Vec<TemplateDraft> {
    let mut tallies: BTreeMap<(u8, u16, u16), Tally> = BTreeMap::new();
    for event in history {
        for date in &event.dates {
            let Some(&answer) = event.answers.get(&date.id) else {
                continue;
            };
            let Some(range) = Span::new(date.start_at, date.end_at) else {
                continue;
            };
            let segments = weekly_segments(&range);
            let [segment] = segments.as_slice() else {
                continue;
            };
            let tally = tallies
                .entry((segment.weekday, segment.minutes.start, segment.minutes.end))
                .or_default();
            if answer {
                tally.available += 1;
            } else {
                tally.unavailable += 1;
            }
        }
    }

    tallies
        .into_iter()
        .filter_map(|((weekday, start_minute, end_minute), tally)| {
            let total = tally.total();
            if total < settings.min_samples {
                return None;
            }
            let available = tally.available > tally.unavailable;
            let majority = tally.available.max(tally.unavailable);
            if f64::from(majority) / f64::from(total) < settings.min_agreement {
                return None;
            }
            Some(TemplateDraft {
                weekday,
                start_minute,
                end_minute,
                available,
                sample_count: total,
            })
        })
        .collect()
}
