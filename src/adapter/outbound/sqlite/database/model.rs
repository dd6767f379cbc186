//! Database model types for Diesel ORM.

use chrono::Utc;
use diesel::prelude::*;

use super::schema::{events, users};
use crate::domain::Event;

/// Database row for the actor behind an event. Upserted on every save.
///
/// Keyed by `(source, id)`: user ids are only unique within a provider.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = users)]
#[diesel(primary_key(source, id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserRow {
    pub id: String,
    pub source: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub age: Option<f64>,
    pub gender: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub followers: Option<f64>,
    pub updated_at: String,
}

/// Database row for an accepted event.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventRow {
    pub event_id: String,
    pub event_timestamp: String,
    pub source: String,
    pub funnel_stage: String,
    pub event_type: String,
    pub user_id: String,
    pub campaign_id: Option<String>,
    /// Engagement object as JSON.
    pub engagement: String,
    /// Whole validated event as JSON.
    pub raw: String,
    pub received_at: String,
}

impl UserRow {
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        let actor = event.actor();
        Self {
            id: actor.user_id.to_string(),
            source: actor.source.as_str().to_string(),
            name: actor.name.map(str::to_string),
            username: actor.username.map(str::to_string),
            age: actor.age,
            gender: actor.gender.map(|g| g.as_str().to_string()),
            country: actor.location.map(|l| l.country.clone()),
            city: actor.location.map(|l| l.city.clone()),
            followers: actor.followers,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

impl EventRow {
    /// # Errors
    /// Returns an error if the event cannot be encoded as JSON.
    pub fn from_event(event: &Event) -> serde_json::Result<Self> {
        Ok(Self {
            event_id: event.event_id().to_string(),
            event_timestamp: event.timestamp().to_string(),
            source: event.source().as_str().to_string(),
            funnel_stage: event.funnel_stage().as_str().to_string(),
            event_type: event.event_type().to_string(),
            user_id: event.user_id().to_string(),
            campaign_id: event.campaign_id().map(str::to_string),
            engagement: event.engagement_json()?,
            raw: serde_json::to_string(event)?,
            received_at: Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::fixtures;

    #[test]
    fn facebook_rows_carry_profile_and_campaign() {
        let event = fixtures::facebook_event("fb-1");

        let user = UserRow::from_event(&event);
        let row = EventRow::from_event(&event).unwrap();

        assert_eq!(user.source, "facebook");
        assert!(user.name.is_some());
        assert!(user.country.is_some());
        assert!(user.username.is_none());
        assert_eq!(row.event_type, "ad.click");
        assert_eq!(row.funnel_stage, "bottom");
        assert_eq!(row.campaign_id.as_deref(), Some("camp-1"));
    }

    #[test]
    fn tiktok_rows_carry_handle_and_followers() {
        let event = fixtures::tiktok_event("tt-1");

        let user = UserRow::from_event(&event);
        let row = EventRow::from_event(&event).unwrap();

        assert_eq!(user.id, "u1");
        assert_eq!(user.username.as_deref(), Some("test"));
        assert_eq!(user.followers, Some(100.0));
        assert!(user.age.is_none());
        assert!(row.campaign_id.is_none());

        let raw: serde_json::Value = serde_json::from_str(&row.raw).unwrap();
        assert_eq!(raw["eventId"], "tt-1");
        assert_eq!(raw["source"], "tiktok");
    }
}
