//! SharedKey request signing.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::error::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// Account credential used to sign every request.
pub struct SharedKeyCredential {
    pub account: String,
    key: Vec<u8>,
}

/// Request fields entering the string-to-sign, in the order the service
/// canonicalizes them.
pub struct SignRequest<'a> {
    pub method: &'a str,
    /// Resource path below the account, e.g. `/container/dir/file.txt`.
    pub path: &'a str,
    /// Query parameters, decoded.
    pub query: &'a [(String, String)],
    pub content_length: u64,
    pub content_type: &'a str,
    pub content_md5: &'a str,
    pub range: &'a str,
    /// All `x-ms-*` headers. A BTreeMap keeps them in the sorted order the
    /// canonicalization requires.
    pub ms_headers: &'a BTreeMap<String, String>,
}

impl SharedKeyCredential {
    pub fn new(account: impl Into<String>, account_key: &str) -> StorageResult<Self> {
        let key = BASE64
            .decode(account_key)
            .map_err(|_| StorageError::io("account key is not valid base64"))?;
        Ok(Self {
            account: account.into(),
            key,
        })
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self, request: &SignRequest<'_>) -> String {
        let string_to_sign = self.string_to_sign(request);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        format!("SharedKey {}:{}", self.account, signature)
    }

    fn string_to_sign(&self, request: &SignRequest<'_>) -> String {
        // Content-Length signs as the empty string when zero.
        let content_length = if request.content_length == 0 {
            String::new()
        } else {
            request.content_length.to_string()
        };

        // VERB, content headers, Date (empty: x-ms-date is canonicalized
        // below), conditional headers.
        let mut string_to_sign = format!(
            "{}\n\n\n{}\n{}\n{}\n\n\n\n\n\n{}\n",
            request.method.to_uppercase(),
            content_length,
            request.content_md5,
            request.content_type,
            request.range,
        );

        for (name, value) in request.ms_headers {
            string_to_sign.push_str(&name.to_lowercase());
            string_to_sign.push(':');
            string_to_sign.push_str(value.trim());
            string_to_sign.push('\n');
        }

        string_to_sign.push('/');
        string_to_sign.push_str(&self.account);
        string_to_sign.push_str(request.path);

        let mut query: Vec<_> = request.query.iter().collect();
        query.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
        for (key, value) in query {
            string_to_sign.push('\n');
            string_to_sign.push_str(&key.to_lowercase());
            string_to_sign.push(':');
            string_to_sign.push_str(value);
        }

        string_to_sign
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str =
        "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

    fn headers() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("x-ms-date".to_string(), "Thu, 01 Jan 2026 00:00:00 GMT".to_string());
        map.insert("x-ms-version".to_string(), "2021-10-04".to_string());
        map
    }

    #[test]
    fn signature_is_deterministic() {
        let cred = SharedKeyCredential::new("devstoreaccount1", TEST_KEY).unwrap();
        let ms_headers = headers();
        let request = SignRequest {
            method: "PUT",
            path: "/data/file.txt",
            query: &[("comp".to_string(), "blocklist".to_string())],
            content_length: 42,
            content_type: "text/plain",
            content_md5: "",
            range: "",
            ms_headers: &ms_headers,
        };
        let first = cred.authorization(&request);
        let second = cred.authorization(&request);
        assert_eq!(first, second);
        assert!(first.starts_with("SharedKey devstoreaccount1:"));
    }

    #[test]
    fn string_to_sign_orders_query_params() {
        let cred = SharedKeyCredential::new("acct", TEST_KEY).unwrap();
        let ms_headers = headers();
        let query = vec![
            ("restype".to_string(), "container".to_string()),
            ("comp".to_string(), "list".to_string()),
        ];
        let request = SignRequest {
            method: "GET",
            path: "/data",
            query: &query,
            content_length: 0,
            content_type: "",
            content_md5: "",
            range: "",
            ms_headers: &ms_headers,
        };
        let s = cred.string_to_sign(&request);
        let comp = s.find("\ncomp:list").unwrap();
        let restype = s.find("\nrestype:container").unwrap();
        assert!(comp < restype);
        assert!(s.starts_with("GET\n"));
        assert!(s.contains("/acct/data"));
    }

    #[test]
    fn rejects_invalid_key() {
        assert!(SharedKeyCredential::new("acct", "not base64!!").is_err());
    }
}
