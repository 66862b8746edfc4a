//! Error types surfaced by the engine.

use thiserror::Error;

/// The event field a parse failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Id,
    Pubkey,
    Sig,
    Kind,
    CreatedAt,
    Content,
    Tags,
}

/// Failures from the streaming JSON parsers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input is not well-formed JSON.
    #[error("input is not valid JSON")]
    InvalidJson,
    /// A field is present but has the wrong type, length or format.
    #[error("invalid {0:?} field")]
    InvalidField(EventField),
    /// A field appears more than once.
    #[error("duplicate {0:?} field")]
    DuplicateField(EventField),
    /// A required field never appeared.
    #[error("missing {0:?} field")]
    MissingField(EventField),
    /// The message does not have the expected array/object shape.
    #[error("unexpected message shape")]
    UnexpectedShape,
    /// The relay message type string is not one the engine knows.
    #[error("unknown relay message type")]
    UnknownMessageType,
    /// A subscription id exceeds the bound.
    #[error("subscription id too long")]
    SubscriptionIdTooLong,
    /// An OK message carried a malformed event id.
    #[error("malformed event id in relay message")]
    InvalidEventId,
}

/// Failures from bech32 entity decoding and encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    /// The human-readable prefix is not a known entity type.
    #[error("unknown entity prefix")]
    UnknownPrefix,
    /// Bech32 decoding failed (checksum, charset, casing).
    #[error("bech32 decode failed")]
    Codec,
    /// A bare entity's payload is not the expected fixed size.
    #[error("wrong payload length")]
    PayloadLength,
    /// A TLV record's declared length runs past the payload.
    #[error("TLV record overruns the payload")]
    TlvOverrun,
    /// A TLV value has the wrong length for its type.
    #[error("TLV value has the wrong length")]
    TlvValueLength,
    /// Required/forbidden TLV multiplicities are violated for this type.
    #[error("TLV multiplicity violation")]
    TlvMultiplicity,
    /// More relay hints than the engine is willing to carry.
    #[error("too many relay hints")]
    TooManyRelayHints,
    /// Encoding was asked for an entity missing its required fields.
    #[error("entity is missing required fields")]
    IncompleteEntity,
}

/// Failures from signing, verification, and NIP-04 encryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The secret key is not a valid curve scalar.
    #[error("invalid secret key")]
    InvalidSeckey,
    /// The public key does not name a curve point.
    #[error("invalid public key")]
    InvalidPubkey,
    /// Signing produced an event that does not verify.
    #[error("signing failed")]
    SigningFailed,
    /// The encrypted payload is not `base64(ct) + "?iv=" + base64(iv)`.
    #[error("malformed encrypted payload")]
    MalformedPayload,
    /// AES-CBC decryption or PKCS#7 unpadding failed.
    #[error("decryption failed")]
    DecryptFailed,
    /// The decrypted plaintext is not valid UTF-8.
    #[error("decrypted plaintext is not valid UTF-8")]
    InvalidUtf8,
}

/// Failures from account custody and persistence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// The operation needs a secret key this account does not hold.
    #[error("operation requires a secret key")]
    NeedsSeckey,
    /// The account file names a custody type the engine cannot use.
    #[error("unsupported account type")]
    UnsupportedType,
    /// The account file is truncated or otherwise malformed.
    #[error("corrupt account file")]
    CorruptFile,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
