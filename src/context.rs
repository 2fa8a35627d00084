//! Evaluation context: the request-scoped attributes a toggle is evaluated against.
use std::{borrow::Cow, collections::HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lenient;

/// Attributes describing the request being evaluated.
///
/// Reserved attributes have dedicated fields; anything else goes to `properties`. Every field is
/// optional and an absent field never matches a constraint.
///
/// # Examples
/// ```
/// # use toggle_engine::Context;
/// let context = Context::new()
///     .user_id("7")
///     .property("plan", "enterprise");
/// # assert_eq!(context.user_id.as_deref(), Some("7"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[allow(missing_docs)]
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// RFC 3339 timestamp. When absent, the evaluation instant is used.
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub current_time: Option<String>,
    /// Custom attributes.
    #[serde(
        default,
        deserialize_with = "lenient::string_map",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub properties: HashMap<String, String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Context {
        Context::default()
    }

    #[allow(missing_docs)]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[allow(missing_docs)]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[allow(missing_docs)]
    pub fn remote_address(mut self, remote_address: impl Into<String>) -> Self {
        self.remote_address = Some(remote_address.into());
        self
    }

    #[allow(missing_docs)]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    #[allow(missing_docs)]
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    #[allow(missing_docs)]
    pub fn current_time(mut self, current_time: impl Into<String>) -> Self {
        self.current_time = Some(current_time.into());
        self
    }

    /// Set a custom property.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// A context attribute referenced by name from a constraint, override or stickiness setting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ContextField {
    UserId,
    SessionId,
    RemoteAddress,
    Environment,
    AppName,
    CurrentTime,
    Property(String),
}

impl From<&str> for ContextField {
    fn from(name: &str) -> ContextField {
        match name {
            "userId" => ContextField::UserId,
            "sessionId" => ContextField::SessionId,
            "remoteAddress" => ContextField::RemoteAddress,
            "environment" => ContextField::Environment,
            "appName" => ContextField::AppName,
            "currentTime" => ContextField::CurrentTime,
            other => ContextField::Property(other.to_owned()),
        }
    }
}

/// Engine-wide context defaults, applied when a context leaves the field out.
#[derive(Debug, Clone, Default)]
pub(crate) struct StaticContext {
    pub app_name: Option<String>,
    pub environment: Option<String>,
}

/// A context bound to the defaults and the instant of one evaluation call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Subject<'a> {
    context: &'a Context,
    defaults: &'a StaticContext,
    now: DateTime<Utc>,
}

impl<'a> Subject<'a> {
    pub fn new(context: &'a Context, defaults: &'a StaticContext, now: DateTime<Utc>) -> Self {
        Subject {
            context,
            defaults,
            now,
        }
    }

    pub fn user_id(&self) -> Option<&'a str> {
        self.context.user_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&'a str> {
        self.context.session_id.as_deref()
    }

    pub fn remote_address(&self) -> Option<&'a str> {
        self.context.remote_address.as_deref()
    }

    /// Resolve an attribute by field. `currentTime` always resolves.
    pub fn get(&self, field: &ContextField) -> Option<Cow<'a, str>> {
        let context = self.context;
        let value = match field {
            ContextField::UserId => context.user_id.as_deref(),
            ContextField::SessionId => context.session_id.as_deref(),
            ContextField::RemoteAddress => context.remote_address.as_deref(),
            ContextField::Environment => context
                .environment
                .as_deref()
                .or(self.defaults.environment.as_deref()),
            ContextField::AppName => context
                .app_name
                .as_deref()
                .or(self.defaults.app_name.as_deref()),
            ContextField::CurrentTime => {
                return Some(match context.current_time.as_deref() {
                    Some(s) => Cow::Borrowed(s),
                    None => Cow::Owned(self.now.to_rfc3339()),
                })
            }
            ContextField::Property(name) => context.properties.get(name).map(String::as_str),
        };
        value.map(Cow::Borrowed)
    }

    /// Instant the evaluation is happening at, from the context's `currentTime` if it parses.
    ///
    /// Returns `None` only when the context supplies an unparseable `currentTime`.
    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        match self.context.current_time.as_deref() {
            Some(s) => parse_timestamp(s),
            None => Some(self.now),
        }
    }
}

/// Which context field a rollout or variant split is hashed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Stickiness {
    /// `userId`, then `sessionId`, then `remoteAddress`.
    Default,
    Random,
    Field(ContextField),
}

impl Stickiness {
    pub fn parse(name: Option<&str>) -> Stickiness {
        match name.map(str::trim) {
            None | Some("") | Some("default") => Stickiness::Default,
            Some("random") => Stickiness::Random,
            Some(field) => Stickiness::Field(field.into()),
        }
    }

    /// The value to hash on. `None` means the caller has to pick a random bucket or give up.
    pub fn resolve<'a>(&self, subject: &Subject<'a>) -> Option<Cow<'a, str>> {
        match self {
            Stickiness::Default => subject
                .user_id()
                .or_else(|| subject.session_id())
                .or_else(|| subject.remote_address())
                .map(Cow::Borrowed),
            Stickiness::Random => None,
            Stickiness::Field(field) => subject.get(field),
        }
    }
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Context, ContextField, StaticContext, Stickiness, Subject};

    #[test]
    fn default_stickiness_chain() {
        let defaults = StaticContext::default();
        let now = Utc::now();

        let context = Context::new().session_id("s").remote_address("10.0.0.1");
        let subject = Subject::new(&context, &defaults, now);
        assert_eq!(Stickiness::Default.resolve(&subject).as_deref(), Some("s"));

        let context = Context::new().remote_address("10.0.0.1");
        let subject = Subject::new(&context, &defaults, now);
        assert_eq!(
            Stickiness::Default.resolve(&subject).as_deref(),
            Some("10.0.0.1")
        );
        assert_eq!(Stickiness::Random.resolve(&subject), None);

        let context = Context::new().user_id("u").property("tenant", "acme");
        let subject = Subject::new(&context, &defaults, now);
        assert_eq!(Stickiness::Default.resolve(&subject).as_deref(), Some("u"));
        assert_eq!(
            Stickiness::parse(Some("tenant")).resolve(&subject).as_deref(),
            Some("acme")
        );
        assert_eq!(Stickiness::parse(None), Stickiness::Default);
        assert_eq!(Stickiness::parse(Some("random")), Stickiness::Random);
    }

    #[test]
    fn deserializes_numbers_as_strings() {
        let context: Context = serde_json::from_str(
            r#"{"userId": 42, "sessionId": null, "properties": {"age": 31, "beta": true}}"#,
        )
        .unwrap();
        assert_eq!(context.user_id.as_deref(), Some("42"));
        assert_eq!(context.session_id, None);
        assert_eq!(context.properties.get("age").map(String::as_str), Some("31"));
        assert_eq!(context.properties.get("beta").map(String::as_str), Some("true"));
    }

    #[test]
    fn resolves_reserved_and_custom_fields() {
        let context = Context::new().user_id("u1").property("region", "eu");
        let defaults = StaticContext::default();
        let subject = Subject::new(&context, &defaults, Utc::now());

        assert_eq!(subject.get(&"userId".into()).as_deref(), Some("u1"));
        assert_eq!(subject.get(&"region".into()).as_deref(), Some("eu"));
        assert_eq!(subject.get(&"sessionId".into()), None);
        assert_eq!(subject.get(&"userIdx".into()), None);
    }

    #[test]
    fn static_defaults_fill_missing_fields() {
        let defaults = StaticContext {
            app_name: Some("billing".to_owned()),
            environment: Some("production".to_owned()),
        };
        let context = Context::new().environment("staging");
        let subject = Subject::new(&context, &defaults, Utc::now());

        assert_eq!(subject.get(&ContextField::AppName).as_deref(), Some("billing"));
        assert_eq!(
            subject.get(&ContextField::Environment).as_deref(),
            Some("staging")
        );
    }

    #[test]
    fn current_time_defaults_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let defaults = StaticContext::default();

        let context = Context::new();
        let subject = Subject::new(&context, &defaults, now);
        assert_eq!(subject.current_time(), Some(now));

        let context = Context::new().current_time("2020-01-01T00:00:00Z");
        let subject = Subject::new(&context, &defaults, now);
        assert_eq!(
            subject.current_time(),
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
        );

        let context = Context::new().current_time("yesterday");
        let subject = Subject::new(&context, &defaults, now);
        assert_eq!(subject.current_time(), None);
    }
}
