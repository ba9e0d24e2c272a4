//! Drives the configured search algorithm through its three phases.

use std::collections::HashMap;
use std::time::Instant;

use sleuth_types::{BrightnessFilter, Crossmatch, Reliability, Transient, TransientId};
use tracing::debug;

use crate::column_map::ColumnMaps;
use crate::conesearch::CatalogueSession;
use crate::crossmatcher::{CatalogueCrossmatcher, SearchPass};
use crate::error::ClassifierResult;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Unprocessed,
    SynonymMatched,
    AssociationMatched,
    AnnotationOnly,
}

impl MatchState {
    /// State after a match of the given reliability.
    fn advance(self, phase: Reliability) -> Self {
        match (self, phase) {
            (MatchState::Unprocessed, Reliability::Synonym) => MatchState::SynonymMatched,
            (MatchState::Unprocessed, Reliability::Association) => MatchState::AssociationMatched,
            (MatchState::Unprocessed, Reliability::Annotation) => MatchState::AnnotationOnly,
            (state, _) => state,
        }
    }
}

#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub matches: Vec<Crossmatch>,
    pub states: HashMap<TransientId, MatchState>,
}

/// Runs every phase over the batch and collects the raw matches.
///
/// Synonym and annotation searches see the whole batch. Association
/// searches only see transients that no synonym search matched.
pub async fn run_search_algorithm<S: CatalogueSession + ?Sized>(
    session: &mut S,
    transients: &[Transient],
    settings: &Settings,
    column_maps: &ColumnMaps,
) -> ClassifierResult<SearchOutcome> {
    let mut states: HashMap<TransientId, MatchState> = transients
        .iter()
        .map(|t| (t.id, MatchState::Unprocessed))
        .collect();
    let mut matches = Vec::new();
    let mut matcher = CatalogueCrossmatcher::new(session, settings, column_maps);

    for phase in Reliability::PHASES {
        let started = Instant::now();
        let candidates: Vec<Transient> = match phase {
            Reliability::Association => transients
                .iter()
                .filter(|t| states.get(&t.id) != Some(&MatchState::SynonymMatched))
                .cloned()
                .collect(),
            Reliability::Synonym | Reliability::Annotation => transients.to_vec(),
        };
        if candidates.is_empty() {
            continue;
        }

        let before = matches.len();
        for search in &settings.searches {
            for filter in BrightnessFilter::ALL {
                let pass = SearchPass {
                    search,
                    filter,
                    phase,
                };
                if pass.association_type().is_none() {
                    continue;
                }

                let found = matcher.run(&candidates, pass).await?;
                for crossmatch in &found {
                    if let Some(state) = states.get_mut(&crossmatch.transient_object_id) {
                        *state = state.advance(phase);
                    }
                }
                matches.extend(found);
            }
        }

        debug!(
            phase = %phase,
            transients = candidates.len(),
            matches = matches.len() - before,
            duration_ms = started.elapsed().as_millis() as u64,
            "search phase complete"
        );
    }

    Ok(SearchOutcome { matches, states })
}
