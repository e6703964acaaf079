use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("ssrc={0} index={1}: packet already seen")]
    Replayed(u32, i64),
    #[error("ssrc={0} index={1}: packet older than the replay window")]
    TooOld(u32, i64),
    #[error("failed to verify auth tag")]
    AuthFailed,
    #[error("packet too short: got {0} bytes, need at least {1}")]
    PacketTooShort(usize, usize),
    #[error("session keys have not been derived")]
    KeyNotDerived,
    #[error("packet index overflow, stream must be re-keyed")]
    IndexOverflow,

    #[error("master key must be len {0}, got {1}")]
    MasterKeyLength(usize, usize),
    #[error("master salt must be len {0}, got {1}")]
    MasterSaltLength(usize, usize),
    #[error("cipher rejected session key of len {0}")]
    SessionKeyLength(usize),
    #[error("no such protection profile {0:#06x}")]
    UnknownProfile(u16),
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("keying material must be len {0}, got {1}")]
    KeyingMaterialLength(usize, usize),

    #[error("{0}")]
    Util(#[from] util::Error),
}
