//! Device enrollment.
//!
//! An enrollment submission is validated, registered as a provisioning
//! record, written verbatim (minus raw key material) to every enabled
//! storage sink, and recorded in the audit trail.
//!
//! Sink writes are independent: one failing sink does not undo another.
//! Only when every sink fails does the call fail, and then a record created
//! by that same call is moved to `FAILED` so it does not block the client's
//! next attempt.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dm_storage::{ObjectStore, join_key};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditTrail, DeviceAction, DeviceConnection, Outcome};
use crate::error::{EnrollError, ProvisioningError};
use crate::provisioning::{
    ProvisioningRecord, ProvisioningStatus, ProvisioningStore, Registration, UNKNOWN_KEY,
};

const MAX_EMAIL_LEN: usize = 254;
const MAX_DEVICE_NAME_LEN: usize = 100;
const MAX_FINGERPRINT_LEN: usize = 500;

/// Audit rows returned by [`EnrollmentService::status`] by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// `sha256:<hex>` fingerprint of key material.
#[must_use]
pub fn fingerprint(key_material: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(key_material.as_bytes())))
}

/// A validated enrollment submission.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub client_uuid: Uuid,
    /// Trimmed and lowercased.
    pub email: String,
    /// Trimmed and lowercased.
    pub device_name: Option<String>,
    /// As supplied by the client.
    pub encryption_key_fingerprint: Option<String>,
    /// Fingerprint of the supplied `encryption_key`, if any.
    pub derived_key_fingerprint: Option<String>,
    pub comments: Option<String>,
    /// The submitted object with `encryption_key` replaced by its
    /// fingerprint. This is what the sinks receive.
    pub payload: Map<String, Value>,
}

impl EnrollmentRequest {
    /// Parse and validate a raw request body.
    ///
    /// # Errors
    ///
    /// Returns [`EnrollError::Validation`] describing the first problem.
    pub fn parse(body: &[u8]) -> Result<Self, EnrollError> {
        if body.is_empty() {
            return Err(invalid("empty body"));
        }
        let value: Value =
            serde_json::from_slice(body).map_err(|_| invalid("body is not valid JSON"))?;
        let Value::Object(mut payload) = value else {
            return Err(invalid("body must be a JSON object"));
        };

        let client_uuid = match optional_str(&payload, "client_uuid")?
            .or(optional_str(&payload, "plugin_uuid")?)
        {
            Some(raw) => Uuid::parse_str(raw.trim())
                .map_err(|_| invalid("client_uuid: not a valid UUID"))?,
            None => return Err(invalid("missing required field: client_uuid")),
        };

        let email = optional_str(&payload, "email")?
            .ok_or_else(|| invalid("missing required field: email"))?
            .trim()
            .to_ascii_lowercase();
        validate_email(&email).map_err(|reason| invalid(&format!("email: {reason}")))?;

        let device_name = match optional_str(&payload, "device_name")? {
            Some(raw) => {
                let name = raw.trim().to_ascii_lowercase();
                if name.is_empty() {
                    return Err(invalid("device_name: must not be empty"));
                }
                if name.chars().count() > MAX_DEVICE_NAME_LEN {
                    return Err(invalid("device_name: too long"));
                }
                Some(name)
            }
            None => None,
        };

        let encryption_key_fingerprint = optional_str(&payload, "encryption_key_fingerprint")?
            .map(str::to_owned);
        if encryption_key_fingerprint
            .as_ref()
            .is_some_and(|f| f.chars().count() > MAX_FINGERPRINT_LEN)
        {
            return Err(invalid("encryption_key_fingerprint: too long"));
        }

        let derived_key_fingerprint = optional_str(&payload, "encryption_key")?
            .filter(|k| !k.is_empty())
            .map(fingerprint);
        if let Some(derived) = &derived_key_fingerprint {
            payload.insert("encryption_key".to_owned(), Value::String(derived.clone()));
        }

        let comments = optional_str(&payload, "comments")?.map(str::to_owned);

        Ok(Self {
            client_uuid,
            email,
            device_name,
            encryption_key_fingerprint,
            derived_key_fingerprint,
            comments,
            payload,
        })
    }

    /// Key identifier stored on the provisioning record.
    #[must_use]
    pub fn stored_key(&self) -> &str {
        self.derived_key_fingerprint
            .as_deref()
            .or(self.encryption_key_fingerprint.as_deref())
            .filter(|k| !k.is_empty())
            .unwrap_or(UNKNOWN_KEY)
    }

    /// Key identifier recorded in the audit row.
    #[must_use]
    pub fn audit_fingerprint(&self) -> &str {
        self.encryption_key_fingerprint
            .as_deref()
            .or(self.derived_key_fingerprint.as_deref())
            .filter(|k| !k.is_empty())
            .unwrap_or(UNKNOWN_KEY)
    }
}

fn invalid(message: &str) -> EnrollError {
    EnrollError::Validation(message.to_owned())
}

/// A string field, treating `null` as absent and rejecting other types.
fn optional_str<'a>(
    payload: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, EnrollError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(invalid(&format!("{field}: must be a string"))),
    }
}

fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.is_empty() {
        return Err("must not be empty");
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err("too long");
    }
    if email.chars().any(char::is_whitespace) {
        return Err("must not contain whitespace");
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err("missing '@'");
    };
    if local.is_empty() || domain.contains('@') {
        return Err("not a valid address");
    }
    if !domain.contains('.') || domain.split('.').any(str::is_empty) {
        return Err("domain is not valid");
    }
    Ok(())
}

/// Where the request came from, for the audit row.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// The storage sinks an enrollment can be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SinkKind {
    Local,
    S3,
}

impl SinkKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }
}

/// An enabled sink: a store plus the key prefix enrollments go under.
#[derive(Clone)]
pub struct Sink {
    pub kind: SinkKind,
    pub store: Arc<dyn ObjectStore>,
    pub prefix: String,
}

impl Sink {
    #[must_use]
    pub fn new(kind: SinkKind, store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            kind,
            store,
            prefix: prefix.into(),
        }
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("kind", &self.kind)
            .field("backend", &self.store.name())
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Result of a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub record: ProvisioningRecord,
    /// `true` if this call created the record.
    pub created: bool,
    /// Sink name to stored location.
    pub stored: BTreeMap<&'static str, String>,
    /// Sink name to client-safe failure reason.
    pub failed: BTreeMap<&'static str, &'static str>,
}

/// The active record of a client plus its recent activity.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub record: ProvisioningRecord,
    pub recent: Vec<DeviceConnection>,
}

/// Orchestrates enrollment and operator actions on provisioning records.
#[derive(Clone)]
pub struct EnrollmentService {
    provisioning: Arc<dyn ProvisioningStore>,
    audit: AuditTrail,
    sinks: Vec<Sink>,
}

impl std::fmt::Debug for EnrollmentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentService")
            .field("provisioning", &self.provisioning.name())
            .field("audit", &self.audit)
            .field("sinks", &self.sinks)
            .finish()
    }
}

impl EnrollmentService {
    #[must_use]
    pub fn new(
        provisioning: Arc<dyn ProvisioningStore>,
        audit: AuditTrail,
        sinks: Vec<Sink>,
    ) -> Self {
        Self {
            provisioning,
            audit,
            sinks,
        }
    }

    #[must_use]
    pub fn sinks(&self) -> &[Sink] {
        &self.sinks
    }

    #[must_use]
    pub fn provisioning(&self) -> &Arc<dyn ProvisioningStore> {
        &self.provisioning
    }

    #[must_use]
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Enroll a validated submission.
    ///
    /// # Errors
    ///
    /// - [`EnrollError::NoSinkEnabled`] if no sink is configured. Nothing is
    ///   recorded.
    /// - [`EnrollError::Provisioning`] if the record cannot be registered.
    /// - [`EnrollError::AllSinksFailed`] if every sink write failed.
    pub async fn enroll(
        &self,
        request: EnrollmentRequest,
        client: &ClientInfo,
    ) -> Result<EnrollOutcome, EnrollError> {
        if self.sinks.is_empty() {
            return Err(EnrollError::NoSinkEnabled);
        }

        let registration = Registration {
            client_uuid: request.client_uuid,
            email: request.email.clone(),
            device_name: request.device_name.clone(),
            encryption_key: request.stored_key().to_owned(),
            comments: request.comments.clone(),
        };
        let registered = self.provisioning.register(registration.clone()).await?;

        let body = serde_json::to_vec(&request.payload)
            .map_err(|e| EnrollError::Validation(format!("payload cannot be stored: {e}")))?;
        let file_name = format!(
            "{}-{}.json",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        );

        let mut stored = BTreeMap::new();
        let mut failed = BTreeMap::new();
        for sink in &self.sinks {
            let key = join_key(
                &sink.prefix,
                &format!("{}/{file_name}", request.client_uuid),
            );
            match sink.store.put(&key, body.clone(), "application/json").await {
                Ok(location) => {
                    stored.insert(sink.kind.as_str(), location);
                }
                Err(e) => {
                    warn!(
                        sink = sink.kind.as_str(),
                        client_uuid = %request.client_uuid,
                        error = %e,
                        "enrollment sink write failed"
                    );
                    failed.insert(sink.kind.as_str(), e.public_reason());
                }
            }
        }

        let mut record = registered.record;
        let outcome = if stored.is_empty() {
            if registered.created {
                match self
                    .provisioning
                    .transition(record.id, ProvisioningStatus::Failed, None)
                    .await
                {
                    Ok(updated) => record = updated,
                    Err(e) => warn!(
                        record_id = %record.id,
                        error = %e,
                        "could not mark provisioning record as failed"
                    ),
                }
            }
            Outcome::Failed
        } else {
            if !registered.created {
                match self.provisioning.refresh(record.id, &registration).await {
                    Ok(updated) => record = updated,
                    Err(e) => warn!(
                        record_id = %record.id,
                        error = %e,
                        "could not refresh provisioning record"
                    ),
                }
            }
            Outcome::Ok
        };

        let row = DeviceConnection::new(DeviceAction::Enroll, &request.email, request.client_uuid)
            .with_fingerprint(request.audit_fingerprint())
            .with_source(client.source_ip.clone(), client.user_agent.clone())
            .with_outcome(outcome);
        self.audit.record_best_effort(&row).await;

        if outcome == Outcome::Failed {
            return Err(EnrollError::AllSinksFailed { failures: failed });
        }

        info!(
            client_uuid = %request.client_uuid,
            status = %record.status,
            created = registered.created,
            sinks = stored.len(),
            "device enrolled"
        );

        Ok(EnrollOutcome {
            record,
            created: registered.created,
            stored,
            failed,
        })
    }

    /// Move a client's `PENDING` record to `ENROLLED`.
    ///
    /// # Errors
    ///
    /// - [`ProvisioningError::NotFound`] if the client has no active record.
    /// - [`ProvisioningError::InvalidTransition`] if it is already enrolled.
    pub async fn accept(
        &self,
        client_uuid: Uuid,
        comment: Option<String>,
    ) -> Result<ProvisioningRecord, EnrollError> {
        self.move_active(client_uuid, ProvisioningStatus::Enrolled, comment)
            .await
    }

    /// Move a client's active record to `REVOKED`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::NotFound`] if the client has no active
    /// record.
    pub async fn revoke(
        &self,
        client_uuid: Uuid,
        comment: Option<String>,
    ) -> Result<ProvisioningRecord, EnrollError> {
        self.move_active(client_uuid, ProvisioningStatus::Revoked, comment)
            .await
    }

    async fn move_active(
        &self,
        client_uuid: Uuid,
        to: ProvisioningStatus,
        comment: Option<String>,
    ) -> Result<ProvisioningRecord, EnrollError> {
        let active = self
            .provisioning
            .find_active(client_uuid)
            .await?
            .ok_or(ProvisioningError::NotFound { client_uuid })?;
        let record = self.provisioning.transition(active.id, to, comment).await?;
        info!(
            client_uuid = %client_uuid,
            from = %active.status,
            to = %record.status,
            "provisioning status changed"
        );
        Ok(record)
    }

    /// The active record of a client and its most recent audit rows.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::NotFound`] if the client has no active
    /// record.
    pub async fn status(
        &self,
        client_uuid: Uuid,
        limit: usize,
    ) -> Result<DeviceStatus, EnrollError> {
        let record = self
            .provisioning
            .find_active(client_uuid)
            .await?
            .ok_or(ProvisioningError::NotFound { client_uuid })?;
        let recent = self.audit.recent(client_uuid, limit).await?;
        Ok(DeviceStatus { record, recent })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditBackend;
    use crate::provisioning::MemoryProvisioningStore;
    use dm_storage::MemoryBackend;

    const CLIENT: &str = "b9bdf6ad-3b1f-4f1a-9f07-4f8606c3fe5a";

    struct Fixture {
        service: EnrollmentService,
        provisioning: MemoryProvisioningStore,
        audit: MemoryAuditBackend,
        local: MemoryBackend,
        s3: MemoryBackend,
    }

    fn fixture() -> Fixture {
        let provisioning = MemoryProvisioningStore::new();
        let audit = MemoryAuditBackend::new();
        let local = MemoryBackend::new();
        let s3 = MemoryBackend::new();
        let service = EnrollmentService::new(
            Arc::new(provisioning.clone()),
            AuditTrail::new().with_backend(Arc::new(audit.clone())),
            vec![
                Sink::new(SinkKind::Local, Arc::new(local.clone()), ""),
                Sink::new(SinkKind::S3, Arc::new(s3.clone()), "enroll/"),
            ],
        );
        Fixture {
            service,
            provisioning,
            audit,
            local,
            s3,
        }
    }

    fn request(body: &str) -> EnrollmentRequest {
        EnrollmentRequest::parse(body.as_bytes()).unwrap()
    }

    fn valid_body() -> String {
        format!(r#"{{"device_name":"matisse","plugin_uuid":"{CLIENT}","email":"User@Example.com"}}"#)
    }

    fn validation_message(body: &str) -> String {
        match EnrollmentRequest::parse(body.as_bytes()) {
            Err(EnrollError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn parse_normalizes_fields() {
        let req = request(&valid_body());
        assert_eq!(req.client_uuid, Uuid::parse_str(CLIENT).unwrap());
        assert_eq!(req.email, "user@example.com");
        assert_eq!(req.device_name.as_deref(), Some("matisse"));
        assert_eq!(req.stored_key(), UNKNOWN_KEY);
    }

    #[test]
    fn parse_rejects_malformed_bodies() {
        assert_eq!(validation_message(""), "empty body");
        assert_eq!(validation_message("{not json"), "body is not valid JSON");
        assert_eq!(validation_message("[1,2]"), "body must be a JSON object");
        assert_eq!(
            validation_message(r#"{"email":"a@x.io"}"#),
            "missing required field: client_uuid"
        );
        assert_eq!(
            validation_message(&format!(r#"{{"client_uuid":"{CLIENT}"}}"#)),
            "missing required field: email"
        );
        assert_eq!(
            validation_message(r#"{"client_uuid":"nope","email":"a@x.io"}"#),
            "client_uuid: not a valid UUID"
        );
        assert!(
            validation_message(&format!(r#"{{"client_uuid":"{CLIENT}","email":"not-an-email"}}"#))
                .starts_with("email:")
        );
        assert_eq!(
            validation_message(&format!(
                r#"{{"client_uuid":"{CLIENT}","email":"a@x.io","device_name":"  "}}"#
            )),
            "device_name: must not be empty"
        );
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("a@x.io").is_ok());
        for bad in ["", "ax.io", "@x.io", "a@x", "a@@x.io", "a b@x.io", "a@x.io.", "a@x..io", "a@.x.io"] {
            assert!(validate_email(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn raw_key_material_is_replaced_by_fingerprint() {
        let req = request(&format!(
            r#"{{"client_uuid":"{CLIENT}","email":"a@x.io","encryption_key":"secret-key"}}"#
        ));
        let expected = fingerprint("secret-key");
        assert!(expected.starts_with("sha256:"));
        assert_eq!(req.stored_key(), expected);
        assert_eq!(req.payload["encryption_key"], Value::String(expected));
        assert!(!serde_json::to_string(&req.payload).unwrap().contains("secret-key"));
    }

    #[tokio::test]
    async fn enroll_writes_every_sink_and_audits() {
        let f = fixture();
        let out = f
            .service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap();

        assert!(out.created);
        assert_eq!(out.record.status, ProvisioningStatus::Pending);
        assert_eq!(out.stored.len(), 2);
        assert!(out.failed.is_empty());

        let local_keys = f.local.keys().await;
        assert_eq!(local_keys.len(), 1);
        assert!(local_keys[0].starts_with(&format!("{CLIENT}/")));
        assert!(local_keys[0].ends_with(".json"));
        let s3_keys = f.s3.keys().await;
        assert!(s3_keys[0].starts_with(&format!("enroll/{CLIENT}/")));

        let rows = f.audit.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, DeviceAction::Enroll);
        assert_eq!(rows[0].outcome, Outcome::Ok);
        assert_eq!(rows[0].email, "user@example.com");
    }

    #[tokio::test]
    async fn partial_sink_failure_still_succeeds() {
        let f = fixture();
        f.s3.set_offline(true);

        let out = f
            .service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap();

        assert!(out.stored.contains_key("local"));
        assert_eq!(out.failed.get("s3"), Some(&"write failed"));
        assert_eq!(out.record.status, ProvisioningStatus::Pending);
    }

    #[tokio::test]
    async fn all_sinks_failing_marks_new_record_failed() {
        let f = fixture();
        f.local.set_offline(true);
        f.s3.set_offline(true);

        let err = f
            .service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::AllSinksFailed { ref failures } if failures.len() == 2));

        let client = Uuid::parse_str(CLIENT).unwrap();
        let history = f.provisioning.history(client).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ProvisioningStatus::Failed);
        assert_eq!(f.audit.rows().await[0].outcome, Outcome::Failed);

        f.local.set_offline(false);
        f.s3.set_offline(false);
        let retry = f
            .service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap();
        assert!(retry.created);
    }

    #[tokio::test]
    async fn all_sinks_failing_leaves_refreshed_record_alone() {
        let f = fixture();
        let first = f
            .service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap();
        f.local.set_offline(true);
        f.s3.set_offline(true);

        let changed = format!(
            r#"{{"client_uuid":"{CLIENT}","email":"other@example.org","comments":"changed","encryption_key":"k2"}}"#
        );
        f.service
            .enroll(request(&changed), &ClientInfo::default())
            .await
            .unwrap_err();

        let active = f
            .provisioning
            .find_active(first.record.client_uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active, first.record);
        assert_eq!(active.email, "user@example.com");
        assert!(active.comments.is_none());
        assert_eq!(active.encryption_key, UNKNOWN_KEY);
    }

    #[tokio::test]
    async fn successful_re_enrollment_refreshes_record() {
        let f = fixture();
        let first = f
            .service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap();
        f.s3.set_offline(true);

        let changed = format!(
            r#"{{"client_uuid":"{CLIENT}","email":"other@example.org","comments":"changed"}}"#
        );
        let second = f
            .service
            .enroll(request(&changed), &ClientInfo::default())
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.email, "other@example.org");
        assert_eq!(second.record.comments.as_deref(), Some("changed"));
        let active = f
            .provisioning
            .find_active(first.record.client_uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active, second.record);
    }

    #[tokio::test]
    async fn no_sink_enabled_touches_nothing() {
        let provisioning = MemoryProvisioningStore::new();
        let audit = MemoryAuditBackend::new();
        let service = EnrollmentService::new(
            Arc::new(provisioning.clone()),
            AuditTrail::new().with_backend(Arc::new(audit.clone())),
            Vec::new(),
        );

        let err = service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::NoSinkEnabled));
        assert!(provisioning
            .history(Uuid::parse_str(CLIENT).unwrap())
            .await
            .unwrap()
            .is_empty());
        assert!(audit.rows().await.is_empty());
    }

    #[tokio::test]
    async fn re_enrollment_keeps_a_single_active_record() {
        let f = fixture();
        let first = f
            .service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap();
        let second = f
            .service
            .enroll(request(&valid_body()), &ClientInfo::default())
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(
            f.provisioning
                .history(first.record.client_uuid)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn accept_revoke_and_status() {
        let f = fixture();
        let client = Uuid::parse_str(CLIENT).unwrap();
        let info = ClientInfo {
            source_ip: Some("10.0.0.1".to_owned()),
            user_agent: Some("plugin/1.0".to_owned()),
        };
        f.service.enroll(request(&valid_body()), &info).await.unwrap();

        let accepted = f.service.accept(client, None).await.unwrap();
        assert_eq!(accepted.status, ProvisioningStatus::Enrolled);
        let again = f.service.accept(client, None).await.unwrap_err();
        assert!(matches!(
            again,
            EnrollError::Provisioning(ProvisioningError::InvalidTransition { .. })
        ));

        let status = f.service.status(client, DEFAULT_HISTORY_LIMIT).await.unwrap();
        assert_eq!(status.record.status, ProvisioningStatus::Enrolled);
        assert_eq!(status.recent.len(), 1);
        assert_eq!(status.recent[0].source_ip.as_deref(), Some("10.0.0.1"));

        let revoked = f
            .service
            .revoke(client, Some("lost laptop".to_owned()))
            .await
            .unwrap();
        assert_eq!(revoked.status, ProvisioningStatus::Revoked);
        assert_eq!(revoked.comments.as_deref(), Some("lost laptop"));

        let missing = f.service.revoke(client, None).await.unwrap_err();
        assert!(matches!(
            missing,
            EnrollError::Provisioning(ProvisioningError::NotFound { .. })
        ));
    }
}
