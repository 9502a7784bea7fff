use std::{
    fmt::{Debug, Display},
    ops::{Deref, DerefMut},
};
use tracing::*;

use crate::{
    algorithm::{negotiate, ComponentRegistry, Enc, Mac},
    constant::{size, ssh_transport_code},
    error::{SshError, SshResult},
    model::Data,
    util,
};

macro_rules! create_wrapped_type {
    ($name: ident) => {
        #[derive(Clone, Default, PartialEq, Eq)]
        pub(crate) struct $name(Vec<String>);
        impl Deref for $name {
            type Target = Vec<String>;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.join(","))
            }
        }

        impl From<Vec<String>> for $name {
            fn from(v: Vec<String>) -> Self {
                Self(v)
            }
        }

        impl From<Vec<&str>> for $name {
            fn from(v: Vec<&str>) -> Self {
                Self(v.into_iter().map(|x| x.to_owned()).collect())
            }
        }
    };
}

create_wrapped_type!(Kexs);
create_wrapped_type!(PubKeys);
create_wrapped_type!(Encs);
create_wrapped_type!(Macs);
create_wrapped_type!(Compresses);

/// Which algorithm of each category should be offered first, and whether
/// the "none" cipher and MAC may be offered at all
#[derive(Clone, Debug, Default)]
pub(crate) struct AlgorithmPreferences {
    pub kex: Option<String>,
    pub host_key: Option<String>,
    pub cipher: Option<String>,
    pub mac: Option<String>,
    pub compression: Option<String>,
    pub allow_none: bool,
}

/// The ten name-lists of a SSH_MSG_KEXINIT, the two language lists are
/// always empty
#[derive(Clone, Default, PartialEq, Eq)]
pub(crate) struct AlgList {
    pub key_exchange: Kexs,
    pub public_key: PubKeys,
    pub c_encryption: Encs,
    pub s_encryption: Encs,
    pub c_mac: Macs,
    pub s_mac: Macs,
    pub c_compress: Compresses,
    pub s_compress: Compresses,
}

impl Debug for AlgList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kex: \"{}\", ", self.key_exchange)?;
        write!(f, "pubkey: \"{}\", ", self.public_key)?;
        write!(f, "c_enc: \"{}\", ", self.c_encryption)?;
        write!(f, "s_enc: \"{}\", ", self.s_encryption)?;
        write!(f, "c_mac: \"{}\", ", self.c_mac)?;
        write!(f, "s_mac: \"{}\", ", self.s_mac)?;
        write!(f, "c_compress: \"{}\", ", self.c_compress)?;
        write!(f, "s_compress: \"{}\"", self.s_compress)
    }
}

/// The algorithms picked for one key exchange round
///
/// The MACs are `None` when the matching cipher is an AEAD one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedAlgorithms {
    pub kex: String,
    pub host_key: String,
    pub enc_c2s: String,
    pub enc_s2c: String,
    pub mac_c2s: Option<String>,
    pub mac_s2c: Option<String>,
    pub comp_c2s: String,
    pub comp_s2c: String,
}

impl Display for NegotiatedAlgorithms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "kex: {}, host key: {}, enc: {}/{}, mac: {}/{}, compress: {}/{}",
            self.kex,
            self.host_key,
            self.enc_c2s,
            self.enc_s2c,
            self.mac_c2s.as_deref().unwrap_or("<implicit>"),
            self.mac_s2c.as_deref().unwrap_or("<implicit>"),
            self.comp_c2s,
            self.comp_s2c
        )
    }
}

impl AlgList {
    pub fn new() -> Self {
        AlgList {
            ..Default::default()
        }
    }

    /// Build our offer from the registry order.
    ///
    /// `host_keys` restricts the host key list, a server can only offer what
    /// its own key signs.
    pub fn from_registry(
        registry: &ComponentRegistry,
        prefs: &AlgorithmPreferences,
        host_keys: Option<&[String]>,
    ) -> Self {
        let strip_none = |mut v: Vec<String>| {
            if !prefs.allow_none {
                v.retain(|x| x != Enc::None.as_ref() && x != Mac::None.as_ref());
            }
            v
        };

        let mut public_key = registry.host_keys().list(prefs.host_key.as_deref());
        if let Some(allowed) = host_keys {
            public_key.retain(|x| allowed.contains(x));
        }
        let encryption = strip_none(registry.ciphers().list(prefs.cipher.as_deref()));
        let mac = strip_none(registry.macs().list(prefs.mac.as_deref()));
        let compress = registry.compressions().list(prefs.compression.as_deref());

        AlgList {
            key_exchange: registry.key_exchanges().list(prefs.kex.as_deref()).into(),
            public_key: public_key.into(),
            c_encryption: encryption.clone().into(),
            s_encryption: encryption.into(),
            c_mac: mac.clone().into(),
            s_mac: mac.into(),
            c_compress: compress.clone().into(),
            s_compress: compress.into(),
        }
    }

    /// parse a SSH_MSG_KEXINIT payload, returning the lists and the
    /// `first_kex_packet_follows` flag
    pub fn from_kexinit(payload: &[u8]) -> SshResult<(Self, bool)> {
        let mut data = Data::from(payload);
        let code = data.get_u8()?;
        if code != ssh_transport_code::KEXINIT {
            return Err(SshError::ProtocolViolation(format!(
                "expect KEXINIT but got message {}",
                code
            )));
        }
        // skip the 16-bit cookie
        data.skip(size::COOKIE_LEN)?;
        let mut peer_algorithm = Self::new();

        macro_rules! try_convert {
            ($hint: literal, $field: ident) => {
                let alg_string = util::vec_u8_to_string(data.get_u8s()?, ",")?;
                debug!("peer {}: {:?}", $hint, alg_string);
                peer_algorithm.$field = alg_string.into();
            };
        }
        try_convert!("key exchange", key_exchange);
        try_convert!("public key", public_key);
        try_convert!("c2s encryption", c_encryption);
        try_convert!("s2c encryption", s_encryption);
        try_convert!("c2s mac", c_mac);
        try_convert!("s2c mac", s_mac);
        try_convert!("c2s compression", c_compress);
        try_convert!("s2c compression", s_compress);
        // languages
        data.get_u8s()?;
        data.get_u8s()?;
        let first_kex_packet_follows = data.get_bool()?;
        // reserved
        data.get_u32()?;
        Ok((peer_algorithm, first_kex_packet_follows))
    }

    /// a complete SSH_MSG_KEXINIT payload, fresh cookie included
    pub fn as_kexinit(&self) -> Data {
        let mut data = Data::new();
        data.put_u8(ssh_transport_code::KEXINIT);
        data.extend(util::cookie());
        data.put_str(&self.key_exchange.to_string())
            .put_str(&self.public_key.to_string())
            .put_str(&self.c_encryption.to_string())
            .put_str(&self.s_encryption.to_string())
            .put_str(&self.c_mac.to_string())
            .put_str(&self.s_mac.to_string())
            .put_str(&self.c_compress.to_string())
            .put_str(&self.s_compress.to_string())
            .put_str("")
            .put_str("")
            .put_bool(false)
            .put_u32(0_u32);
        data
    }

    /// Pick one algorithm per category.
    ///
    /// `client` and `server` are the lists of the respective sides, whoever
    /// runs this; `is_aead` tells whether a cipher name makes the MAC implicit.
    pub fn negotiate<F>(client: &Self, server: &Self, is_aead: F) -> SshResult<NegotiatedAlgorithms>
    where
        F: Fn(&str) -> bool,
    {
        macro_rules! match_field {
            ($field: ident, $err_hint: literal) => {
                negotiate(&client.$field, &server.$field)
                    .map(|x| x.to_owned())
                    .ok_or_else(|| {
                        let err_msg = format!(
                            "Key_agreement: the {} fails to match, \
                        algorithms supported by the server: {}, \
                        algorithms supported by the client: {}",
                            $err_hint, server.$field, client.$field
                        );
                        error!(err_msg);
                        SshError::KexError(err_msg)
                    })
            };
        }

        let kex = match_field!(key_exchange, "DH algorithm")?;
        let host_key = match_field!(public_key, "signature algorithm")?;
        let enc_c2s = match_field!(c_encryption, "client encryption algorithm")?;
        let enc_s2c = match_field!(s_encryption, "server encryption algorithm")?;

        let mac_c2s = if is_aead(&enc_c2s) {
            None
        } else {
            Some(match_field!(c_mac, "client mac algorithm")?)
        };
        let mac_s2c = if is_aead(&enc_s2c) {
            None
        } else {
            Some(match_field!(s_mac, "server mac algorithm")?)
        };

        let comp_c2s = match_field!(c_compress, "client compression algorithm")?;
        let comp_s2c = match_field!(s_compress, "server compression algorithm")?;

        let negotiated = NegotiatedAlgorithms {
            kex,
            host_key,
            enc_c2s,
            enc_s2c,
            mac_c2s,
            mac_s2c,
            comp_c2s,
            comp_s2c,
        };
        info!("matched algorithms [{}]", negotiated);
        Ok(negotiated)
    }
}
