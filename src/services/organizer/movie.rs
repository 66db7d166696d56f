//! Movie organizer

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::OrganizerType;
use crate::error::OrganizeError;

use super::{Correction, OrganizeOutcome, OrganizeRequest, Organizer, OrganizerContext};

pub struct MovieOrganizer {
    context: Arc<OrganizerContext>,
}

impl MovieOrganizer {
    pub fn new(context: Arc<OrganizerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Organizer for MovieOrganizer {
    fn organizer_type(&self) -> OrganizerType {
        OrganizerType::Movie
    }

    async fn organize(&self, request: OrganizeRequest<'_>) -> Result<OrganizeOutcome, OrganizeError> {
        if let Some(Correction::Episode { .. }) = request.correction {
            return Err(OrganizeError::Configuration(
                "An episode correction cannot be applied to a movie".to_string(),
            ));
        }

        let (tokens, base) = self.context.begin(request.source, OrganizerType::Movie).await;

        self.context
            .run(request, OrganizerType::Movie, tokens, base)
            .await
    }
}
