//! Schema validation for inbound event payloads.
//!
//! [`validate`] walks an arbitrary JSON value against the provider schema
//! selected by its `source` discriminator and collects every field-level
//! violation instead of stopping at the first one. Malformed input is a normal
//! outcome here: nothing in this module panics on user data.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use super::event::{
    Browser, ClickPosition, Event, FacebookDevice, FacebookEventType, FunnelStage, Gender,
    Referrer, Source, TiktokDevice, TiktokEventType,
};

/// One schema violation, addressed by a dotted path (`data.user.age`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
}

/// A rejected payload with all of its violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationFailure {
    violations: Vec<FieldViolation>,
}

impl ValidationFailure {
    #[must_use]
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    #[must_use]
    pub fn into_violations(self) -> Vec<FieldViolation> {
        self.violations
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .violations
            .iter()
            .map(|v| {
                if v.path.is_empty() {
                    v.message.clone()
                } else {
                    format!("{}: {}", v.path, v.message)
                }
            })
            .collect();
        f.write_str(&rendered.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

/// Validate a payload against the provider schemas.
///
/// # Errors
///
/// Returns every violation found when the payload does not conform to the
/// schema selected by its `source` field.
pub fn validate(payload: &Value) -> Result<Event, ValidationFailure> {
    let mut checker = Checker::default();
    let Some(root) = checker.object(Some(payload), "") else {
        return Err(checker.finish());
    };

    let source = match root.get("source") {
        None => {
            checker.push("source", "Required");
            None
        }
        Some(Value::String(raw)) => {
            let parsed = Source::parse(raw);
            if parsed.is_none() {
                checker.push(
                    "source",
                    format!(
                        "Invalid discriminator value. Expected {}",
                        quoted(&Source::wire_names())
                    ),
                );
            }
            parsed
        }
        Some(other) => {
            checker.push(
                "source",
                format!(
                    "Invalid discriminator value. Expected {}, received {}",
                    quoted(&Source::wire_names()),
                    kind(other)
                ),
            );
            None
        }
    };

    let Some(source) = source else {
        return Err(checker.finish());
    };

    checker.string(root, "eventId", "");
    checker.string(root, "timestamp", "");
    checker.one_of(root, "funnelStage", "", &FunnelStage::wire_names());
    match source {
        Source::Facebook => {
            checker.one_of(root, "eventType", "", &FacebookEventType::wire_names());
            checker.facebook_data(root.get("data"));
        }
        Source::Tiktok => {
            checker.one_of(root, "eventType", "", &TiktokEventType::wire_names());
            checker.tiktok_data(root.get("data"));
        }
    }

    if !checker.violations.is_empty() {
        return Err(checker.finish());
    }

    serde_json::from_value(payload.clone()).map_err(|err| ValidationFailure {
        violations: vec![FieldViolation {
            path: String::new(),
            message: err.to_string(),
        }],
    })
}

type Shape = fn(&mut Checker, &Map<String, Value>, &str);

#[derive(Default)]
struct Checker {
    violations: Vec<FieldViolation>,
}

impl Checker {
    fn finish(self) -> ValidationFailure {
        ValidationFailure {
            violations: self.violations,
        }
    }

    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            path: path.into(),
            message: message.into(),
        });
    }

    fn object<'a>(&mut self, value: Option<&'a Value>, path: &str) -> Option<&'a Map<String, Value>> {
        match value {
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                self.push(path, format!("Expected object, received {}", kind(other)));
                None
            }
            None => {
                self.push(path, "Required");
                None
            }
        }
    }

    fn string(&mut self, obj: &Map<String, Value>, key: &str, parent: &str) {
        let path = join(parent, key);
        match obj.get(key) {
            Some(Value::String(_)) => {}
            Some(other) => self.push(path, format!("Expected string, received {}", kind(other))),
            None => self.push(path, "Required"),
        }
    }

    fn nullable_string(&mut self, obj: &Map<String, Value>, key: &str, parent: &str) {
        let path = join(parent, key);
        match obj.get(key) {
            Some(Value::String(_) | Value::Null) => {}
            Some(other) => self.push(path, format!("Expected string, received {}", kind(other))),
            None => self.push(path, "Required"),
        }
    }

    fn number(&mut self, obj: &Map<String, Value>, key: &str, parent: &str) {
        let path = join(parent, key);
        match obj.get(key) {
            Some(Value::Number(_)) => {}
            Some(other) => self.push(path, format!("Expected number, received {}", kind(other))),
            None => self.push(path, "Required"),
        }
    }

    fn one_of(&mut self, obj: &Map<String, Value>, key: &str, parent: &str, allowed: &[&str]) {
        let path = join(parent, key);
        match obj.get(key) {
            Some(Value::String(raw)) if allowed.contains(&raw.as_str()) => {}
            Some(Value::String(raw)) => self.push(
                path,
                format!(
                    "Invalid enum value. Expected {}, received '{raw}'",
                    quoted(allowed)
                ),
            ),
            Some(other) => self.push(
                path,
                format!(
                    "Expected {}, received {}",
                    quoted(allowed),
                    kind(other)
                ),
            ),
            None => self.push(path, "Required"),
        }
    }

    /// Accept the value when any shape matches; otherwise report the closest
    /// shape's violations.
    fn union(&mut self, value: Option<&Value>, path: &str, shapes: &[Shape]) {
        let Some(obj) = self.object(value, path) else {
            return;
        };

        let mut closest: Option<Vec<FieldViolation>> = None;
        for shape in shapes {
            let mut probe = Checker::default();
            shape(&mut probe, obj, path);
            if probe.violations.is_empty() {
                return;
            }
            if closest
                .as_ref()
                .map_or(true, |best| probe.violations.len() < best.len())
            {
                closest = Some(probe.violations);
            }
        }

        self.push(path, "Invalid input: does not match any engagement shape");
        self.violations.extend(closest.unwrap_or_default());
    }

    fn facebook_data(&mut self, value: Option<&Value>) {
        let Some(data) = self.object(value, "data") else {
            return;
        };

        if let Some(user) = self.object(data.get("user"), "data.user") {
            let p = "data.user";
            self.string(user, "userId", p);
            self.string(user, "name", p);
            self.number(user, "age", p);
            self.one_of(user, "gender", p, &Gender::wire_names());
            if let Some(location) = self.object(user.get("location"), "data.user.location") {
                self.string(location, "country", "data.user.location");
                self.string(location, "city", "data.user.location");
            }
        }

        self.union(
            data.get("engagement"),
            "data.engagement",
            &[facebook_top_engagement, facebook_bottom_engagement],
        );
    }

    fn tiktok_data(&mut self, value: Option<&Value>) {
        let Some(data) = self.object(value, "data") else {
            return;
        };

        if let Some(user) = self.object(data.get("user"), "data.user") {
            let p = "data.user";
            self.string(user, "userId", p);
            self.string(user, "username", p);
            self.number(user, "followers", p);
        }

        self.union(
            data.get("engagement"),
            "data.engagement",
            &[tiktok_top_engagement, tiktok_bottom_engagement],
        );
    }
}

fn facebook_top_engagement(c: &mut Checker, obj: &Map<String, Value>, p: &str) {
    c.string(obj, "actionTime", p);
    c.one_of(obj, "referrer", p, &Referrer::wire_names());
    c.nullable_string(obj, "videoId", p);
}

fn facebook_bottom_engagement(c: &mut Checker, obj: &Map<String, Value>, p: &str) {
    c.string(obj, "adId", p);
    c.string(obj, "campaignId", p);
    c.one_of(obj, "clickPosition", p, &ClickPosition::wire_names());
    c.one_of(obj, "device", p, &FacebookDevice::wire_names());
    c.one_of(obj, "browser", p, &Browser::wire_names());
    c.nullable_string(obj, "purchaseAmount", p);
}

fn tiktok_top_engagement(c: &mut Checker, obj: &Map<String, Value>, p: &str) {
    c.number(obj, "watchTime", p);
    c.number(obj, "percentageWatched", p);
    c.one_of(obj, "device", p, &TiktokDevice::wire_names());
    c.string(obj, "country", p);
    c.string(obj, "videoId", p);
}

fn tiktok_bottom_engagement(c: &mut Checker, obj: &Map<String, Value>, p: &str) {
    c.string(obj, "actionTime", p);
    c.nullable_string(obj, "profileId", p);
    c.nullable_string(obj, "purchasedItem", p);
    c.nullable_string(obj, "purchaseAmount", p);
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
