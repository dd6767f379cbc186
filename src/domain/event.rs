//! Canonical event model.
//!
//! An [`Event`] is tagged on its `source` field; each provider variant carries
//! its own event-type vocabulary, actor shape and engagement payload. The wire
//! format is camelCase JSON and is what lands in the durable queue file, the
//! dead-letter file and the broker message body.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declares a closed string vocabulary with its wire names.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant,)+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Wire name of this variant.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }

            /// Look up a variant by its wire name.
            #[must_use]
            pub fn parse(value: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.as_str() == value)
            }

            /// Wire names of every variant.
            #[must_use]
            pub fn wire_names() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Provider that emitted the event; the schema discriminator.
    Source {
        Facebook => "facebook",
        Tiktok => "tiktok",
    }
}

wire_enum! {
    /// Marketing funnel position of the event.
    FunnelStage {
        Top => "top",
        Bottom => "bottom",
    }
}

wire_enum! {
    FacebookEventType {
        AdView => "ad.view",
        PageLike => "page.like",
        Comment => "comment",
        VideoView => "video.view",
        AdClick => "ad.click",
        FormSubmission => "form.submission",
        CheckoutComplete => "checkout.complete",
    }
}

wire_enum! {
    TiktokEventType {
        VideoView => "video.view",
        Like => "like",
        Share => "share",
        Comment => "comment",
        ProfileVisit => "profile.visit",
        Purchase => "purchase",
        Follow => "follow",
    }
}

wire_enum! {
    Gender {
        Male => "male",
        Female => "female",
        NonBinary => "non-binary",
    }
}

wire_enum! {
    Referrer {
        Newsfeed => "newsfeed",
        Marketplace => "marketplace",
        Groups => "groups",
    }
}

wire_enum! {
    ClickPosition {
        TopLeft => "top_left",
        BottomRight => "bottom_right",
        Center => "center",
    }
}

wire_enum! {
    FacebookDevice {
        Mobile => "mobile",
        Desktop => "desktop",
    }
}

wire_enum! {
    Browser {
        Chrome => "Chrome",
        Firefox => "Firefox",
        Safari => "Safari",
    }
}

wire_enum! {
    TiktokDevice {
        Android => "Android",
        Ios => "iOS",
        Desktop => "Desktop",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookUser {
    pub user_id: String,
    pub name: String,
    pub age: f64,
    pub gender: Gender,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookTopEngagement {
    pub action_time: String,
    pub referrer: Referrer,
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookBottomEngagement {
    pub ad_id: String,
    pub campaign_id: String,
    pub click_position: ClickPosition,
    pub device: FacebookDevice,
    pub browser: Browser,
    pub purchase_amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FacebookEngagement {
    Top(FacebookTopEngagement),
    Bottom(FacebookBottomEngagement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacebookData {
    pub user: FacebookUser,
    pub engagement: FacebookEngagement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookEvent {
    pub event_id: String,
    pub timestamp: String,
    pub funnel_stage: FunnelStage,
    pub event_type: FacebookEventType,
    pub data: FacebookData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokUser {
    pub user_id: String,
    pub username: String,
    pub followers: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokTopEngagement {
    pub watch_time: f64,
    pub percentage_watched: f64,
    pub device: TiktokDevice,
    pub country: String,
    pub video_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokBottomEngagement {
    pub action_time: String,
    pub profile_id: Option<String>,
    pub purchased_item: Option<String>,
    pub purchase_amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TiktokEngagement {
    Top(TiktokTopEngagement),
    Bottom(TiktokBottomEngagement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiktokData {
    pub user: TiktokUser,
    pub engagement: TiktokEngagement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokEvent {
    pub event_id: String,
    pub timestamp: String,
    pub funnel_stage: FunnelStage,
    pub event_type: TiktokEventType,
    pub data: TiktokData,
}

/// A validated inbound event, discriminated by provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Event {
    Facebook(FacebookEvent),
    Tiktok(TiktokEvent),
}

/// Actor attributes flattened across providers for upserting.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor<'a> {
    pub user_id: &'a str,
    pub source: Source,
    pub name: Option<&'a str>,
    pub username: Option<&'a str>,
    pub age: Option<f64>,
    pub gender: Option<Gender>,
    pub location: Option<&'a Location>,
    pub followers: Option<f64>,
}

impl Event {
    #[must_use]
    pub fn event_id(&self) -> &str {
        match self {
            Self::Facebook(e) => &e.event_id,
            Self::Tiktok(e) => &e.event_id,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> &str {
        match self {
            Self::Facebook(e) => &e.timestamp,
            Self::Tiktok(e) => &e.timestamp,
        }
    }

    #[must_use]
    pub fn source(&self) -> Source {
        match self {
            Self::Facebook(_) => Source::Facebook,
            Self::Tiktok(_) => Source::Tiktok,
        }
    }

    #[must_use]
    pub fn funnel_stage(&self) -> FunnelStage {
        match self {
            Self::Facebook(e) => e.funnel_stage,
            Self::Tiktok(e) => e.funnel_stage,
        }
    }

    /// Wire name of the provider-specific event type (e.g. `video.view`).
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Facebook(e) => e.event_type.as_str(),
            Self::Tiktok(e) => e.event_type.as_str(),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::Facebook(e) => &e.data.user.user_id,
            Self::Tiktok(e) => &e.data.user.user_id,
        }
    }

    /// Campaign attribution; only facebook bottom-funnel engagements carry one.
    #[must_use]
    pub fn campaign_id(&self) -> Option<&str> {
        match self {
            Self::Facebook(FacebookEvent {
                data:
                    FacebookData {
                        engagement: FacebookEngagement::Bottom(bottom),
                        ..
                    },
                ..
            }) => Some(&bottom.campaign_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn actor(&self) -> Actor<'_> {
        match self {
            Self::Facebook(e) => {
                let user = &e.data.user;
                Actor {
                    user_id: &user.user_id,
                    source: Source::Facebook,
                    name: Some(&user.name),
                    username: None,
                    age: Some(user.age),
                    gender: Some(user.gender),
                    location: Some(&user.location),
                    followers: None,
                }
            }
            Self::Tiktok(e) => {
                let user = &e.data.user;
                Actor {
                    user_id: &user.user_id,
                    source: Source::Tiktok,
                    name: None,
                    username: Some(&user.username),
                    age: None,
                    gender: None,
                    location: None,
                    followers: Some(user.followers),
                }
            }
        }
    }

    /// JSON encoding of the engagement payload alone.
    pub fn engagement_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Facebook(e) => serde_json::to_string(&e.data.engagement),
            Self::Tiktok(e) => serde_json::to_string(&e.data.engagement),
        }
    }
}
