//! HTTP message signatures (RFC 9421) and `Content-Digest` (RFC 9530)
//!
//! Only the subset needed between federated servers is implemented:
//! request signatures over derived components (`@method`, `@target-uri`,
//! `@authority`, `@scheme`, `@path`, `@query`, `@request-target`) and plain
//! header fields, with `sha-256` / `sha-512` body digests.
//!
//! A request signed by [`sign_request`] carries:
//!
//! ```text
//! Content-Digest: sha-256=:<base64>:
//! Signature-Input: sig1=("@method" "@target-uri" "content-digest");created=..;keyid="..";alg="ed25519";nonce=".."
//! Signature: sig1=:<base64>:
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use http::{HeaderMap, HeaderValue};
use sha2::{Digest, Sha256, Sha512};

use crate::authority::{normalize, split_url};
use crate::crypto::{SignatureAlgorithm, SigningKeyManager};
use crate::error::{Result, TrustError};

pub const SIGNATURE_INPUT_HEADER: &str = "signature-input";
pub const SIGNATURE_HEADER: &str = "signature";
pub const CONTENT_DIGEST_HEADER: &str = "content-digest";

const DEFAULT_LABEL: &str = "sig1";

/// The request being signed or verified
#[derive(Debug, Clone, Copy)]
pub struct MessageComponents<'a> {
    pub method: &'a str,
    /// Absolute target URI, `scheme://authority/path?query`
    pub target_uri: &'a str,
    pub headers: &'a HeaderMap,
}

/// Parameters of one `Signature-Input` member
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureParams {
    /// Covered component identifiers, in order
    pub covered: Vec<String>,
    pub created: Option<i64>,
    pub expires: Option<i64>,
    pub key_id: Option<String>,
    pub alg: Option<String>,
    pub nonce: Option<String>,
    pub tag: Option<String>,
    /// Serialized inner list and parameters, as signed
    raw: String,
}

impl SignatureParams {
    pub fn covers(&self, component: &str) -> bool {
        self.covered.iter().any(|c| c == component)
    }
}

/// Freshness and coverage requirements for verification
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    /// Current unix time in seconds
    pub now: i64,
    /// Oldest acceptable `created`, in seconds
    pub max_age: i64,
    /// Tolerated clock skew for `created` in the future, in seconds
    pub max_skew: i64,
    /// Whether `content-digest` must be covered (non-empty body)
    pub require_content_digest: bool,
}

impl VerifyOptions {
    pub fn at(now: i64) -> Self {
        Self {
            now,
            max_age: 300,
            max_skew: 300,
            require_content_digest: true,
        }
    }

    pub fn now() -> Self {
        Self::at(chrono::Utc::now().timestamp())
    }
}

/// A signature read from `Signature-Input` / `Signature`
#[derive(Debug, Clone)]
pub struct HttpSignature {
    pub label: String,
    pub params: SignatureParams,
    pub signature: Vec<u8>,
}

/// True when either signature header is present
pub fn has_signature_headers(headers: &HeaderMap) -> bool {
    headers.contains_key(SIGNATURE_INPUT_HEADER) || headers.contains_key(SIGNATURE_HEADER)
}

impl HttpSignature {
    /// Read the signature from request headers
    ///
    /// Returns `Ok(None)` only when both headers are absent. One header
    /// without the other is malformed.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>> {
        let input = combined_header(headers, SIGNATURE_INPUT_HEADER)?;
        let signature = combined_header(headers, SIGNATURE_HEADER)?;

        let (input, signature) = match (input, signature) {
            (None, None) => return Ok(None),
            (Some(input), Some(signature)) => (input, signature),
            _ => {
                return Err(TrustError::MalformedSignatureHeader(
                    "Signature-Input and Signature must be sent together".into(),
                ))
            }
        };

        let inputs = split_members(&input)?;
        let signatures = split_members(&signature)?;

        for (label, value) in &inputs {
            if let Some((_, sig_value)) = signatures.iter().find(|(l, _)| l == label) {
                return Ok(Some(Self {
                    label: label.clone(),
                    params: parse_params(value)?,
                    signature: parse_byte_sequence(sig_value)?,
                }));
            }
        }

        Err(TrustError::MalformedSignatureHeader(
            "no Signature-Input label has a matching Signature".into(),
        ))
    }

    /// The `keyid` parameter
    pub fn key_id(&self) -> Result<&str> {
        self.params
            .key_id
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TrustError::MalformedSignatureHeader("missing keyid".into()))
    }

    /// Algorithm named by `alg`, or `fallback` when the parameter is absent
    pub fn algorithm(&self, fallback: SignatureAlgorithm) -> Result<SignatureAlgorithm> {
        match &self.params.alg {
            Some(alg) => alg.parse(),
            None => Ok(fallback),
        }
    }

    /// Build the signature base for `message`
    pub fn signature_base(&self, message: &MessageComponents<'_>) -> Result<String> {
        signature_base(&self.params, message)
    }

    /// Verify against a resolved public key
    ///
    /// Checks coverage and freshness before touching the key. Returns the
    /// algorithm the signature was verified with.
    pub fn verify(
        &self,
        message: &MessageComponents<'_>,
        public_key_pem: &str,
        fallback: SignatureAlgorithm,
        options: &VerifyOptions,
    ) -> Result<SignatureAlgorithm> {
        self.check_coverage(options)?;
        self.check_freshness(options)?;

        let algorithm = self.algorithm(fallback)?;
        let base = self.signature_base(message)?;
        algorithm.verify(public_key_pem, base.as_bytes(), &self.signature)?;
        Ok(algorithm)
    }

    fn check_coverage(&self, options: &VerifyOptions) -> Result<()> {
        let params = &self.params;
        if !params.covers("@method") {
            return Err(TrustError::SignatureInvalid("signature does not cover @method".into()));
        }
        let covers_target = params.covers("@target-uri")
            || (params.covers("@authority")
                && (params.covers("@path") || params.covers("@request-target")));
        if !covers_target {
            return Err(TrustError::SignatureInvalid("signature does not cover the target".into()));
        }
        if options.require_content_digest && !params.covers(CONTENT_DIGEST_HEADER) {
            return Err(TrustError::SignatureInvalid(
                "signature does not cover content-digest".into(),
            ));
        }
        Ok(())
    }

    fn check_freshness(&self, options: &VerifyOptions) -> Result<()> {
        if let Some(expires) = self.params.expires {
            if expires < options.now {
                return Err(TrustError::SignatureInvalid("signature expired".into()));
            }
        }
        let created = self
            .params
            .created
            .ok_or_else(|| TrustError::SignatureInvalid("signature has no created parameter".into()))?;
        if created > options.now + options.max_skew {
            return Err(TrustError::SignatureInvalid("signature created in the future".into()));
        }
        if created < options.now - options.max_age {
            return Err(TrustError::SignatureInvalid("signature too old".into()));
        }
        Ok(())
    }
}

fn combined_header(headers: &HeaderMap, name: &str) -> Result<Option<String>> {
    let mut values = Vec::new();
    for value in headers.get_all(name) {
        let value = value
            .to_str()
            .map_err(|_| TrustError::MalformedSignatureHeader(format!("{} is not ASCII", name)))?;
        values.push(value.trim());
    }
    if values.is_empty() {
        Ok(None)
    } else {
        Ok(Some(values.join(", ")))
    }
}

/// Split a structured-field dictionary into `(key, raw value)` pairs
fn split_members(input: &str) -> Result<Vec<(String, String)>> {
    let mut members = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0usize;

    let mut push = |segment: &str| -> Result<()> {
        let segment = segment.trim();
        if segment.is_empty() {
            return Ok(());
        }
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            TrustError::MalformedSignatureHeader(format!("member without value: {}", segment))
        })?;
        let key = key.trim();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.' | '*'))
        {
            return Err(TrustError::MalformedSignatureHeader(format!("invalid key: {}", key)));
        }
        members.push((key.to_string(), value.trim().to_string()));
        Ok(())
    };

    for (i, c) in input.char_indices() {
        if in_string {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    TrustError::MalformedSignatureHeader("unbalanced parentheses".into())
                })?
            }
            ',' if depth == 0 => {
                push(&input[start..i])?;
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_string || depth != 0 {
        return Err(TrustError::MalformedSignatureHeader("unterminated structure".into()));
    }
    push(&input[start..])?;

    Ok(members)
}

/// Parse `("a" "b");k=v;...` from a `Signature-Input` member value
fn parse_params(value: &str) -> Result<SignatureParams> {
    let value = value.trim();
    let rest = value
        .strip_prefix('(')
        .ok_or_else(|| TrustError::MalformedSignatureHeader("expected inner list".into()))?;
    let close = rest
        .find(')')
        .ok_or_else(|| TrustError::MalformedSignatureHeader("unterminated inner list".into()))?;

    let mut covered = Vec::new();
    for item in rest[..close].split_whitespace() {
        let name = item
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .ok_or_else(|| {
                TrustError::MalformedSignatureHeader(format!(
                    "unsupported component identifier: {}",
                    item
                ))
            })?;
        if name.is_empty() || name.contains(['"', '\\']) {
            return Err(TrustError::MalformedSignatureHeader("invalid component identifier".into()));
        }
        covered.push(name.to_string());
    }

    let mut params = SignatureParams {
        covered,
        raw: value.to_string(),
        ..Default::default()
    };

    let mut remaining = &rest[close + 1..];
    while !remaining.trim().is_empty() {
        let after_semicolon = remaining
            .trim_start()
            .strip_prefix(';')
            .ok_or_else(|| TrustError::MalformedSignatureHeader("expected ';' between parameters".into()))?;
        let (name, after_name) = after_semicolon
            .split_once('=')
            .ok_or_else(|| TrustError::MalformedSignatureHeader("parameter without value".into()))?;
        let (param_value, tail) = read_param_value(after_name)?;
        remaining = tail;

        match name.trim() {
            "created" => params.created = Some(parse_int(&param_value)?),
            "expires" => params.expires = Some(parse_int(&param_value)?),
            "keyid" => params.key_id = Some(param_value),
            "alg" => params.alg = Some(param_value),
            "nonce" => params.nonce = Some(param_value),
            "tag" => params.tag = Some(param_value),
            _ => {}
        }
    }

    Ok(params)
}

/// Read a quoted string or bare token; returns (value, rest)
fn read_param_value(input: &str) -> Result<(String, &str)> {
    if let Some(quoted) = input.strip_prefix('"') {
        let mut out = String::new();
        let mut escaped = false;
        for (i, c) in quoted.char_indices() {
            match (escaped, c) {
                (true, c) => {
                    out.push(c);
                    escaped = false;
                }
                (false, '\\') => escaped = true,
                (false, '"') => return Ok((out, &quoted[i + 1..])),
                (false, c) => out.push(c),
            }
        }
        Err(TrustError::MalformedSignatureHeader("unterminated string".into()))
    } else {
        let end = input.find(';').unwrap_or(input.len());
        let token = input[..end].trim();
        if token.is_empty() {
            return Err(TrustError::MalformedSignatureHeader("empty parameter value".into()));
        }
        Ok((token.to_string(), &input[end..]))
    }
}

fn parse_int(value: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| TrustError::MalformedSignatureHeader(format!("invalid integer: {}", value)))
}

fn parse_byte_sequence(value: &str) -> Result<Vec<u8>> {
    let inner = value
        .trim()
        .strip_prefix(':')
        .and_then(|v| v.strip_suffix(':'))
        .ok_or_else(|| TrustError::MalformedSignatureHeader("expected :base64: byte sequence".into()))?;
    STANDARD
        .decode(inner)
        .map_err(|e| TrustError::MalformedSignatureHeader(format!("invalid base64: {}", e)))
}

fn signature_base(params: &SignatureParams, message: &MessageComponents<'_>) -> Result<String> {
    let mut base = String::new();
    for component in &params.covered {
        let value = component_value(component, message)?;
        base.push_str(&format!("\"{}\": {}\n", component, value));
    }
    base.push_str(&format!("\"@signature-params\": {}", params.raw));
    Ok(base)
}

fn component_value(component: &str, message: &MessageComponents<'_>) -> Result<String> {
    if !component.starts_with('@') {
        let name = component.to_ascii_lowercase();
        let values: Vec<&str> = message
            .headers
            .get_all(name.as_str())
            .iter()
            .map(|v| {
                v.to_str().map(str::trim).map_err(|_| {
                    TrustError::MalformedSignatureHeader(format!("header {} is not ASCII", name))
                })
            })
            .collect::<Result<_>>()?;
        if values.is_empty() {
            return Err(TrustError::SignatureInvalid(format!(
                "covered header {} is missing",
                name
            )));
        }
        return Ok(values.join(", "));
    }

    let parts = split_url(message.target_uri)?;
    let path = parts.parsed.path();
    let query = parts.parsed.query();

    match component {
        "@method" => Ok(message.method.to_string()),
        "@target-uri" => Ok(message.target_uri.to_string()),
        "@authority" => Ok(normalize(parts.authority, parts.scheme())?.into_string()),
        "@scheme" => Ok(parts.scheme().to_string()),
        "@path" => Ok(path.to_string()),
        "@query" => Ok(format!("?{}", query.unwrap_or(""))),
        "@request-target" => Ok(match query {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        }),
        other => Err(TrustError::MalformedSignatureHeader(format!(
            "unsupported derived component {}",
            other
        ))),
    }
}

/// Sign an outbound request with the local key
///
/// Sets `Content-Digest`, `Signature-Input` and `Signature` on `headers`.
pub fn sign_request(
    method: &str,
    target_uri: &str,
    headers: &mut HeaderMap,
    body: &[u8],
    signer: &SigningKeyManager,
    created: i64,
) -> Result<()> {
    headers.insert(CONTENT_DIGEST_HEADER, header_value(&content_digest(body))?);

    let covered = vec![
        "@method".to_string(),
        "@target-uri".to_string(),
        CONTENT_DIGEST_HEADER.to_string(),
    ];
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let alg = signer.algorithm().http_sig_name();
    let raw = format!(
        "({});created={};keyid=\"{}\";alg=\"{}\";nonce=\"{}\"",
        covered
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(" "),
        created,
        signer.key_id(),
        alg,
        nonce
    );
    let params = SignatureParams {
        covered,
        created: Some(created),
        key_id: Some(signer.key_id().to_string()),
        alg: Some(alg.to_string()),
        nonce: Some(nonce),
        raw,
        ..Default::default()
    };

    let message = MessageComponents {
        method,
        target_uri,
        headers: &*headers,
    };
    let base = signature_base(&params, &message)?;
    let signature = signer.sign(base.as_bytes())?;

    headers.insert(
        SIGNATURE_INPUT_HEADER,
        header_value(&format!("{}={}", DEFAULT_LABEL, params.raw))?,
    );
    headers.insert(
        SIGNATURE_HEADER,
        header_value(&format!("{}=:{}:", DEFAULT_LABEL, STANDARD.encode(signature)))?,
    );
    Ok(())
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TrustError::MalformedSignatureHeader(format!("invalid header value: {}", e)))
}

/// `Content-Digest` value for `body` (sha-256)
pub fn content_digest(body: &[u8]) -> String {
    format!("sha-256=:{}:", STANDARD.encode(Sha256::digest(body)))
}

/// Check a `Content-Digest` header against the exact body bytes
///
/// Every supported algorithm listed must match; at least one must be
/// supported.
pub fn verify_content_digest(header: &str, body: &[u8]) -> Result<()> {
    let members = split_members(header).map_err(|e| TrustError::MalformedDigest(e.to_string()))?;

    let mut checked = 0usize;
    for (algorithm, value) in members {
        let expected = parse_byte_sequence(&value).map_err(|e| TrustError::MalformedDigest(e.to_string()))?;
        let actual = match algorithm.as_str() {
            "sha-256" => Sha256::digest(body).to_vec(),
            "sha-512" => Sha512::digest(body).to_vec(),
            _ => continue,
        };
        if expected != actual {
            return Err(TrustError::DigestMismatch);
        }
        checked += 1;
    }

    if checked == 0 {
        return Err(TrustError::MalformedDigest("no supported digest algorithm".into()));
    }
    Ok(())
}
