//! Image registry publishing (CloudStack-style signed query API).
//!
//! Every request is an HTTP GET whose query parameters are signed: keys are
//! sorted, rendered as `key=encodeURIComponent(value)` joined by `&`,
//! lower-cased, HMAC-SHA1'd with the profile secret and base64-encoded into a
//! `signature` parameter. A JSON `errorcode` in the response is a failure.

use crate::config::RegistryProfile;
use crate::error::{ConfigError, RegistryError};
use base64::Engine;
use futures::future::join_all;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::Value;
use sha1::Sha1;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

type HmacSha1 = Hmac<Sha1>;

/// OS type every published template is registered under.
pub const DEFAULT_OS_TYPE: &str = "Other PV Virtio-SCSI (64-bit)";

/// Bytes `encodeURIComponent` leaves alone besides ASCII alphanumerics.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode like JavaScript's `encodeURIComponent`.
pub fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, encode_uri_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Pull an id out of a JSON value that may be a string or a number.
fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Find an `errorcode` at the top level or inside the command's response object.
fn api_error(body: &Value) -> Option<RegistryError> {
    let candidates = std::iter::once(body).chain(body.as_object().into_iter().flat_map(|o| o.values()));
    for candidate in candidates {
        if let Some(code) = candidate.get("errorcode") {
            let text = candidate
                .get("errortext")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Some(RegistryError::Api {
                code: code.as_i64().unwrap_or(-1),
                text,
            });
        }
    }
    None
}

/// Parameters for `registerTemplate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRegistration {
    pub name: String,
    pub display_text: String,
    pub url: String,
    pub ostype_id: String,
    pub format: String,
    pub hypervisor: String,
    pub zone_ids: String,
    pub is_public: bool,
    pub is_featured: bool,
    pub is_extractable: bool,
    pub is_dynamically_scalable: bool,
    pub password_enabled: bool,
}

impl TemplateRegistration {
    /// qcow2 on KVM in every zone, public, featured, extractable, scalable, password-enabled.
    pub fn new(name: &str, url: &str, ostype_id: &str) -> Self {
        TemplateRegistration {
            name: name.to_string(),
            display_text: name.to_string(),
            url: url.to_string(),
            ostype_id: ostype_id.to_string(),
            format: "qcow2".to_string(),
            hypervisor: "kvm".to_string(),
            zone_ids: "-1".to_string(),
            is_public: true,
            is_featured: true,
            is_extractable: true,
            is_dynamically_scalable: true,
            password_enabled: true,
        }
    }

    fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), self.name.clone());
        params.insert("displaytext".to_string(), self.display_text.clone());
        params.insert("url".to_string(), self.url.clone());
        params.insert("ostypeid".to_string(), self.ostype_id.clone());
        params.insert("format".to_string(), self.format.clone());
        params.insert("hypervisor".to_string(), self.hypervisor.clone());
        params.insert("zoneids".to_string(), self.zone_ids.clone());
        params.insert("ispublic".to_string(), self.is_public.to_string());
        params.insert("isfeatured".to_string(), self.is_featured.to_string());
        params.insert("isextractable".to_string(), self.is_extractable.to_string());
        params.insert(
            "isdynamicallyscalable".to_string(),
            self.is_dynamically_scalable.to_string(),
        );
        params.insert("passwordenabled".to_string(), self.password_enabled.to_string());
        params
    }
}

/// Signed client for one registry profile.
pub struct RegistryClient {
    endpoint: String,
    api_key: String,
    secret: String,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(profile: &RegistryProfile) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(RegistryClient {
            endpoint: profile.endpoint.clone(),
            api_key: profile.key.clone(),
            secret: profile.secret.clone(),
            http,
        })
    }

    /// Base64 HMAC-SHA1 signature of the lower-cased canonical query.
    pub fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, RegistryError> {
        let message = canonical_query(params).to_lowercase();
        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes()).map_err(|e| {
            RegistryError::Config(ConfigError::ValidationFailed(format!("invalid secret: {}", e)))
        })?;
        mac.update(message.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Signed GET of `command`. Fails on HTTP errors and on API `errorcode` responses.
    pub async fn request(&self, command: &str, params: BTreeMap<String, String>) -> Result<Value, RegistryError> {
        let mut all = params;
        all.insert("apikey".to_string(), self.api_key.clone());
        all.insert("command".to_string(), command.to_string());
        all.insert("response".to_string(), "json".to_string());

        let signature = self.sign(&all)?;
        let url = format!(
            "{}?{}&signature={}",
            self.endpoint,
            canonical_query(&all),
            encode_uri_component(&signature)
        );
        log::debug!("[Registry] {} -> {}", command, self.endpoint);

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        if let Some(err) = api_error(&body) {
            return Err(err);
        }
        Ok(body)
    }

    /// Id of the first OS type matching `description`.
    pub async fn list_os_types(&self, description: &str) -> Result<String, RegistryError> {
        let mut params = BTreeMap::new();
        params.insert("description".to_string(), description.to_string());
        let body = self.request("listOsTypes", params).await?;
        body.pointer("/listostypesresponse/ostype/0/id")
            .and_then(id_of)
            .ok_or_else(|| RegistryError::UnexpectedResponse(format!("OS type not found: {}", description)))
    }

    pub async fn register_template(&self, registration: &TemplateRegistration) -> Result<String, RegistryError> {
        let body = self.request("registerTemplate", registration.params()).await?;
        body.pointer("/registertemplateresponse/template/0/id")
            .and_then(id_of)
            .ok_or_else(|| RegistryError::UnexpectedResponse("Template registration failed".to_string()))
    }

    /// Tags are sent as `tags[i].key` / `tags[i].value` in the given order.
    pub async fn create_tags(
        &self,
        resource_id: &str,
        resource_type: &str,
        tags: &[(String, String)],
    ) -> Result<(), RegistryError> {
        let mut params = BTreeMap::new();
        params.insert("resourceids".to_string(), resource_id.to_string());
        params.insert("resourcetype".to_string(), resource_type.to_string());
        for (index, (key, value)) in tags.iter().enumerate() {
            params.insert(format!("tags[{}].key", index), key.clone());
            params.insert(format!("tags[{}].value", index), value.clone());
        }
        self.request("createTags", params).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestCustomData {
    pub oscategory: String,
    pub osversion: String,
    pub template_slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestBuild {
    pub custom_data: ManifestCustomData,
}

/// Builder manifest; only the first build's custom data is used for tags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateManifest {
    #[serde(default)]
    pub builds: Vec<ManifestBuild>,
}

impl TemplateManifest {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn tags(&self) -> Option<Vec<(String, String)>> {
        self.builds.first().map(|build| {
            let data = &build.custom_data;
            vec![
                ("oscategory".to_string(), data.oscategory.clone()),
                ("osversion".to_string(), data.osversion.clone()),
                ("template_slug".to_string(), data.template_slug.clone()),
            ]
        })
    }
}

/// Result of publishing to one profile.
#[derive(Debug)]
pub struct PublishOutcome {
    pub profile: String,
    /// Registered template id.
    pub result: Result<String, RegistryError>,
}

/// Register, then tag, on a single profile.
pub async fn publish_to_profile(
    profile: &RegistryProfile,
    name: &str,
    url: &str,
    manifest: &TemplateManifest,
) -> Result<String, RegistryError> {
    let client = RegistryClient::new(profile)?;
    log::info!("[Registry] [{}] Registering template \"{}\"", profile.name, name);

    let ostype_id = client.list_os_types(DEFAULT_OS_TYPE).await?;
    log::info!("[Registry] [{}] Found OS type ID: {}", profile.name, ostype_id);

    let template_id = client
        .register_template(&TemplateRegistration::new(name, url, &ostype_id))
        .await?;
    log::info!("[Registry] [{}] Template registered with ID: {}", profile.name, template_id);

    if let Some(tags) = manifest.tags() {
        client.create_tags(&template_id, "Template", &tags).await?;
        log::info!("[Registry] [{}] Tags applied: {:?}", profile.name, tags);
    }
    Ok(template_id)
}

/// Publish to every profile (or the one named by `selector`) concurrently.
/// Every profile is attempted; failures do not stop the others.
pub async fn publish(
    profiles: &[RegistryProfile],
    selector: Option<&str>,
    name: &str,
    url: &str,
    manifest: &TemplateManifest,
) -> Result<Vec<PublishOutcome>, RegistryError> {
    let selected: Vec<&RegistryProfile> = profiles
        .iter()
        .filter(|p| selector.map_or(true, |wanted| p.name == wanted))
        .collect();
    if selected.is_empty() {
        return Err(RegistryError::Config(ConfigError::ValidationFailed(format!(
            "Profile \"{}\" not found",
            selector.unwrap_or("")
        ))));
    }

    log::info!("[Registry] Found {} profile(s) to deploy to", selected.len());
    let results = join_all(selected.iter().map(|p| publish_to_profile(p, name, url, manifest))).await;

    Ok(selected
        .into_iter()
        .zip(results)
        .map(|(profile, result)| {
            if let Err(e) = &result {
                log::error!("[Registry] [{}] Failed to register \"{}\": {}", profile.name, name, e);
            }
            PublishOutcome {
                profile: profile.name.clone(),
                result,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn profile(endpoint: &str) -> RegistryProfile {
        RegistryProfile {
            name: "zone-a".to_string(),
            endpoint: endpoint.to_string(),
            key: "key".to_string(),
            secret: "secret".to_string(),
        }
    }

    fn manifest() -> TemplateManifest {
        serde_json::from_str(
            r#"{"builds":[{"custom_data":{"oscategory":"ubuntu","osversion":"22.04","template_slug":"ubuntu-22-04"}}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_encode_matches_encode_uri_component() {
        assert_eq!(encode_uri_component("a b/c?d=é"), "a%20b%2Fc%3Fd%3D%C3%A9");
        assert_eq!(encode_uri_component("Other (64-bit)!*'~"), "Other%20(64-bit)!*'~");
        assert_eq!(encode_uri_component("+&=%#"), "%2B%26%3D%25%23");
        assert_eq!(encode_uri_component(""), "");
    }

    #[test]
    fn test_signature_known_vector() {
        let client = RegistryClient::new(&profile("http://localhost/client/api")).unwrap();
        let mut params = BTreeMap::new();
        params.insert("apikey".to_string(), "key".to_string());
        params.insert("command".to_string(), "listOsTypes".to_string());
        params.insert("response".to_string(), "json".to_string());
        params.insert("description".to_string(), DEFAULT_OS_TYPE.to_string());
        assert_eq!(client.sign(&params).unwrap(), "D3bD1vO3BdixAOLVrs6cus2YAgw=");
    }

    #[test]
    fn test_api_error_detected_in_nested_response() {
        let body = serde_json::json!({"listostypesresponse": {"errorcode": 431, "errortext": "bad param"}});
        match api_error(&body) {
            Some(RegistryError::Api { code, text }) => {
                assert_eq!(code, 431);
                assert_eq!(text, "bad param");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
        assert!(api_error(&serde_json::json!({"ok": {"id": 1}})).is_none());
    }

    #[tokio::test]
    async fn test_publish_registers_and_tags() {
        let mut server = mockito::Server::new_async().await;
        let os = server
            .mock("GET", Matcher::Regex("^/client/api".to_string()))
            .match_query(Matcher::UrlEncoded("command".to_string(), "listOsTypes".to_string()))
            .with_status(200)
            .with_body(r#"{"listostypesresponse":{"count":1,"ostype":[{"id":"os-1"}]}}"#)
            .create_async()
            .await;
        let register = server
            .mock("GET", Matcher::Regex("^/client/api".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("command".to_string(), "registerTemplate".to_string()),
                Matcher::UrlEncoded("ostypeid".to_string(), "os-1".to_string()),
                Matcher::UrlEncoded("format".to_string(), "qcow2".to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"registertemplateresponse":{"template":[{"id":"tpl-9"}]}}"#)
            .create_async()
            .await;
        let tags = server
            .mock("GET", Matcher::Regex("^/client/api".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("command".to_string(), "createTags".to_string()),
                Matcher::UrlEncoded("resourceids".to_string(), "tpl-9".to_string()),
                Matcher::UrlEncoded("tags[2].key".to_string(), "template_slug".to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"createtagsresponse":{"jobid":"j1"}}"#)
            .create_async()
            .await;

        let profiles = vec![profile(&format!("{}/client/api", server.url()))];
        let outcomes = publish(&profiles, None, "ubuntu-22.04", "https://dl/ubuntu.qcow2", &manifest())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result.as_ref().unwrap(), "tpl-9");
        os.assert_async().await;
        register.assert_async().await;
        tags.assert_async().await;
    }

    #[tokio::test]
    async fn test_errorcode_fails_profile() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"listostypesresponse":{"errorcode":401,"errortext":"unable to verify user credentials"}}"#)
            .create_async()
            .await;

        let profiles = vec![profile(&format!("{}/client/api", server.url()))];
        let outcomes = publish(&profiles, None, "t", "u", &manifest()).await.unwrap();
        assert!(matches!(outcomes[0].result, Err(RegistryError::Api { code: 401, .. })));
    }

    #[tokio::test]
    async fn test_unknown_profile_selector() {
        let profiles = vec![profile("http://localhost/client/api")];
        let err = publish(&profiles, Some("zone-z"), "t", "u", &manifest()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[test]
    fn test_manifest_tags_order() {
        let tags = manifest().tags().unwrap();
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["oscategory", "osversion", "template_slug"]);
        assert!(TemplateManifest { builds: vec![] }.tags().is_none());
    }
}
