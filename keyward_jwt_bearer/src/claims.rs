use std::collections::BTreeMap;

use aliri::jwt::{self, Audience, Audiences, Issuer, IssuerRef, Subject, SubjectRef};
use aliri_clock::UnixTime;
use serde::{Deserialize, Serialize};

/// The claim set of a JWT bearer assertion
///
/// Registered claims are exposed directly. Anything else the assertion
/// carries is kept in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct AssertionClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<Issuer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<Subject>,
    #[serde(default, skip_serializing_if = "Audiences::is_empty")]
    aud: Audiences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<UnixTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<UnixTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<UnixTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl AssertionClaims {
    /// An empty claim set
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the issuer
    pub fn with_issuer(self, iss: impl Into<Issuer>) -> Self {
        Self {
            iss: Some(iss.into()),
            ..self
        }
    }

    /// Sets the subject
    pub fn with_subject(self, sub: impl Into<Subject>) -> Self {
        Self {
            sub: Some(sub.into()),
            ..self
        }
    }

    /// Adds an audience
    pub fn with_audience(self, aud: impl Into<Audience>) -> Self {
        let mut audiences: Vec<Audience> = self.aud.iter().map(ToOwned::to_owned).collect();
        audiences.push(aud.into());
        Self {
            aud: audiences.into(),
            ..self
        }
    }

    /// Sets the expiration time
    pub fn with_expiration(self, exp: UnixTime) -> Self {
        Self {
            exp: Some(exp),
            ..self
        }
    }

    /// Sets the time before which the assertion must not be accepted
    pub fn with_not_before(self, nbf: UnixTime) -> Self {
        Self {
            nbf: Some(nbf),
            ..self
        }
    }

    /// Sets the issue time
    pub fn with_issued_at(self, iat: UnixTime) -> Self {
        Self {
            iat: Some(iat),
            ..self
        }
    }

    /// Sets the JWT ID
    pub fn with_jwt_id(self, jti: impl Into<String>) -> Self {
        Self {
            jti: Some(jti.into()),
            ..self
        }
    }

    /// Adds a claim outside the registered set
    pub fn with_extra(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Issue time
    #[must_use]
    pub fn iat(&self) -> Option<UnixTime> {
        self.iat
    }

    /// JWT ID
    #[must_use]
    pub fn jti(&self) -> Option<&str> {
        self.jti.as_deref().filter(|j| !j.is_empty())
    }

    /// A claim outside the registered set
    #[must_use]
    pub fn extra(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }
}

impl jwt::CoreClaims for AssertionClaims {
    fn nbf(&self) -> Option<UnixTime> {
        self.nbf
    }

    fn exp(&self) -> Option<UnixTime> {
        self.exp
    }

    fn aud(&self) -> &Audiences {
        &self.aud
    }

    fn iss(&self) -> Option<&IssuerRef> {
        self.iss.as_deref()
    }

    fn sub(&self) -> Option<&SubjectRef> {
        self.sub.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use aliri::jwt::CoreClaims;
    use color_eyre::Result;

    use super::*;

    #[test]
    fn accepts_single_or_many_audiences() -> Result<()> {
        let one: AssertionClaims = serde_json::from_str(
            r#"{"iss":"a","sub":"b","aud":"https://auth.example.com/token","exp":10}"#,
        )?;
        assert_eq!(one.aud().iter().count(), 1);

        let many: AssertionClaims =
            serde_json::from_str(r#"{"aud":["x","y"],"jti":"j","custom":true}"#)?;
        assert_eq!(many.aud().iter().count(), 2);
        assert_eq!(many.jti(), Some("j"));
        assert_eq!(many.extra("custom"), Some(&serde_json::Value::Bool(true)));
        Ok(())
    }

    #[test]
    fn empty_jwt_id_counts_as_absent() -> Result<()> {
        let claims: AssertionClaims = serde_json::from_str(r#"{"jti":""}"#)?;
        assert_eq!(claims.jti(), None);
        Ok(())
    }

    #[test]
    fn builder_accumulates_audiences() -> Result<()> {
        let claims = AssertionClaims::new()
            .with_issuer(Issuer::from_static("iss"))
            .with_audience(Audience::from_static("a"))
            .with_audience(Audience::from_static("b"))
            .with_issued_at(UnixTime(5));

        let json = serde_json::to_value(&claims)?;
        assert_eq!(json["aud"], serde_json::json!(["a", "b"]));
        assert_eq!(json["iat"], serde_json::json!(5));
        assert!(json.get("sub").is_none());
        Ok(())
    }
}
