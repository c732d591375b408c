//! ZMQ multipart framing and HMAC signing.
//!
//! ```text
//! [ident...] <IDS|MSG> signature header parent_header metadata content [buffers...]
//! ```
//!
//! The signature is the hex HMAC-SHA256 of the four JSON frames, keyed by
//! the descriptor's `key`. An empty key disables signing (empty signature
//! on send, no verification on receive).

use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use ji_domain::error::{Error, Result};
use ji_protocol::{Header, Message};

type HmacSha256 = Hmac<Sha256>;

/// Separator between routing identities and the signed message.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// The only signature scheme kernels use in practice.
pub const SCHEME_HMAC_SHA256: &str = "hmac-sha256";

#[derive(Clone)]
pub struct Signer {
    key: Option<Vec<u8>>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("enabled", &self.key.is_some())
            .finish()
    }
}

impl Signer {
    pub fn new(scheme: &str, key: &str) -> Result<Self> {
        if key.is_empty() {
            return Ok(Self::unsigned());
        }
        if scheme != SCHEME_HMAC_SHA256 {
            return Err(Error::Protocol(format!(
                "unsupported signature scheme: {scheme}"
            )));
        }
        Ok(Self {
            key: Some(key.as_bytes().to_vec()),
        })
    }

    pub fn unsigned() -> Self {
        Self { key: None }
    }

    pub fn sign(&self, parts: &[&[u8]]) -> String {
        let Some(ref key) = self.key else {
            return String::new();
        };
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        for part in parts {
            mac.update(part);
        }
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison against the expected signature.
    pub fn verify(&self, signature: &[u8], parts: &[&[u8]]) -> bool {
        if self.key.is_none() {
            return true;
        }
        let expected = self.sign(parts);
        expected.as_bytes().ct_eq(signature).into()
    }
}

/// Encode a message into signed multipart frames.
pub fn encode(msg: &Message, signer: &Signer) -> Result<Vec<Bytes>> {
    let header = serde_json::to_vec(&msg.header)?;
    let parent = if msg.parent_header.is_empty() {
        b"{}".to_vec()
    } else {
        serde_json::to_vec(&msg.parent_header)?
    };
    let metadata = serde_json::to_vec(&msg.metadata)?;
    let content = serde_json::to_vec(&msg.content)?;

    let signature = signer.sign(&[
        header.as_slice(),
        parent.as_slice(),
        metadata.as_slice(),
        content.as_slice(),
    ]);

    Ok(vec![
        Bytes::from_static(DELIMITER),
        Bytes::from(signature),
        Bytes::from(header),
        Bytes::from(parent),
        Bytes::from(metadata),
        Bytes::from(content),
    ])
}

/// Decode multipart frames received on `channel`, verifying the signature.
pub fn decode(frames: &[Bytes], signer: &Signer, channel: &str) -> Result<Message> {
    let pos = frames
        .iter()
        .position(|f| &f[..] == DELIMITER)
        .ok_or_else(|| Error::Protocol("missing <IDS|MSG> delimiter".into()))?;

    let rest = &frames[pos + 1..];
    if rest.len() < 5 {
        return Err(Error::Protocol(format!(
            "expected at least 5 frames after delimiter, got {}",
            rest.len()
        )));
    }

    let (signature, header, parent, metadata, content) =
        (&rest[0], &rest[1], &rest[2], &rest[3], &rest[4]);

    if !signer.verify(
        signature,
        &[&header[..], &parent[..], &metadata[..], &content[..]],
    ) {
        return Err(Error::Protocol("message signature mismatch".into()));
    }

    let header: Header = serde_json::from_slice(header)
        .map_err(|e| Error::Protocol(format!("bad header frame: {e}")))?;
    let parent_header: Header = serde_json::from_slice(parent)
        .map_err(|e| Error::Protocol(format!("bad parent_header frame: {e}")))?;
    let metadata: Value = serde_json::from_slice(metadata)
        .map_err(|e| Error::Protocol(format!("bad metadata frame: {e}")))?;
    let content: Value = serde_json::from_slice(content)
        .map_err(|e| Error::Protocol(format!("bad content frame: {e}")))?;

    Ok(Message {
        header,
        parent_header,
        metadata,
        content,
        channel: Some(channel.to_owned()),
    })
}
