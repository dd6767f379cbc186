//! Canonical payloads for both providers.

use serde_json::{json, Value};

use crate::domain::{validate, Event};

/// Top-funnel tiktok `video.view`.
pub fn tiktok_payload(event_id: &str) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": "2024-05-01T12:00:00Z",
        "source": "tiktok",
        "funnelStage": "top",
        "eventType": "video.view",
        "data": {
            "user": { "userId": "u1", "username": "test", "followers": 100 },
            "engagement": {
                "watchTime": 10,
                "percentageWatched": 100,
                "device": "Android",
                "country": "RU",
                "videoId": "v1"
            }
        }
    })
}

/// Bottom-funnel facebook `ad.click` carrying a campaign.
pub fn facebook_payload(event_id: &str) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": "2024-05-01T12:00:00Z",
        "source": "facebook",
        "funnelStage": "bottom",
        "eventType": "ad.click",
        "data": {
            "user": {
                "userId": "fb-u1",
                "name": "Ana",
                "age": 31,
                "gender": "female",
                "location": { "country": "PT", "city": "Porto" }
            },
            "engagement": {
                "adId": "ad-1",
                "campaignId": "camp-1",
                "clickPosition": "center",
                "device": "mobile",
                "browser": "Safari",
                "purchaseAmount": null
            }
        }
    })
}

pub fn tiktok_event(event_id: &str) -> Event {
    validate(&tiktok_payload(event_id)).unwrap()
}

pub fn facebook_event(event_id: &str) -> Event {
    validate(&facebook_payload(event_id)).unwrap()
}

/// `count` tiktok payloads with ids `evt-0`, `evt-1`, ...
pub fn tiktok_batch(count: usize) -> Vec<Value> {
    (0..count).map(|i| tiktok_payload(&format!("evt-{i}"))).collect()
}
