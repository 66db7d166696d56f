//! TV episode organizer

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::OrganizerType;
use crate::error::OrganizeError;

use super::{Correction, OrganizeOutcome, OrganizeRequest, Organizer, OrganizerContext};

pub struct EpisodeOrganizer {
    context: Arc<OrganizerContext>,
}

impl EpisodeOrganizer {
    pub fn new(context: Arc<OrganizerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Organizer for EpisodeOrganizer {
    fn organizer_type(&self) -> OrganizerType {
        OrganizerType::Episode
    }

    async fn organize(&self, request: OrganizeRequest<'_>) -> Result<OrganizeOutcome, OrganizeError> {
        let (mut tokens, base) = self
            .context
            .begin(request.source, OrganizerType::Episode)
            .await;

        match request.correction {
            Some(Correction::Episode {
                season,
                episode,
                ending_episode,
                ..
            }) => {
                // The user's numbers replace whatever the file name said
                tokens.season = Some(*season);
                tokens.episode = Some(*episode);
                tokens.ending_episode = ending_episode.filter(|end| end > episode);
            }
            Some(Correction::Movie { .. }) => {
                return Err(OrganizeError::Configuration(
                    "A movie correction cannot be applied to an episode".to_string(),
                ));
            }
            None => {}
        }

        if !tokens.has_episode_numbers() {
            let result = base.with_tokens(&tokens);
            let result = if tokens.name.is_some() {
                result.needs_correction("Unable to determine season and episode number")
            } else {
                result.fail("Unable to determine series name, season and episode number")
            };
            return Ok(OrganizeOutcome::unresolved(result, tokens));
        }

        self.context
            .run(request, OrganizerType::Episode, tokens, base)
            .await
    }
}
