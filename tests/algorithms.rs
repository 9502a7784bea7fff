//! Against a live server, run with `cargo test -- --ignored`
mod test {
    use paste::paste;
    use ssh::{Compress, Enc, Kex, Mac, PubKey, SessionBuilder};
    use std::env;

    macro_rules! env_getter {
        ($field:ident, $default: expr) => {
            paste! {
                pub fn [<get_ $field>]() -> String {
                    env::var("SSH_MUX_TEST_".to_owned() + stringify!([<$field:upper>])).unwrap_or($default.to_owned())
                }
            }
        };
    }
    env_getter!(username, "ubuntu");
    env_getter!(server, "127.0.0.1:22");
    env_getter!(pem_rsa, "./rsa_old");

    fn builder() -> SessionBuilder {
        SessionBuilder::new()
            .username(&get_username())
            .private_key_path(get_pem_rsa())
    }

    /// connect preferring one algorithm and check the server agreed to it
    macro_rules! preferred {
        ($name:ident, $setter:ident, $alg:expr, $field:ident) => {
            paste! {
                #[test]
                #[ignore]
                fn [<test_ $name>]() {
                    let session = builder().$setter($alg).connect(get_server()).unwrap();
                    let negotiated = session.negotiated().unwrap();
                    assert_eq!(negotiated.$field, $alg.as_ref());
                    session.close();
                }
            }
        };
    }

    preferred!(curve25519_sha256, preferred_kex, Kex::Curve25519Sha256, kex);
    preferred!(ecdh_sha2_nistp256, preferred_kex, Kex::EcdhSha2Nistrp256, kex);
    preferred!(dh_group14_sha1, preferred_kex, Kex::DiffieHellmanGroup14Sha1, kex);
    preferred!(dh_group14_sha256, preferred_kex, Kex::DiffieHellmanGroup14Sha256, kex);
    preferred!(rsa_sha2_256, preferred_pubkey, PubKey::RsaSha2_256, host_key);
    preferred!(aes128, preferred_enc, Enc::Aes128Ctr, enc_c2s);
    preferred!(aes192, preferred_enc, Enc::Aes192Ctr, enc_c2s);
    preferred!(aes256, preferred_enc, Enc::Aes256Ctr, enc_c2s);
    preferred!(chacha20_poly1305, preferred_enc, Enc::Chacha20Poly1305Openssh, enc_s2c);
    preferred!(compress_none, preferred_compress, Compress::None, comp_c2s);

    #[test]
    #[ignore]
    fn test_hmac_sha1() {
        let session = builder()
            .preferred_enc(Enc::Aes128Ctr)
            .preferred_mac(Mac::HmacSha1)
            .connect(get_server())
            .unwrap();
        let negotiated = session.negotiated().unwrap();
        assert_eq!(negotiated.mac_c2s.as_deref(), Some(Mac::HmacSha1.as_ref()));
        session.close();
    }

    #[test]
    #[ignore]
    fn test_aead_has_no_mac() {
        let session = builder()
            .preferred_enc(Enc::Chacha20Poly1305Openssh)
            .connect(get_server())
            .unwrap();
        let negotiated = session.negotiated().unwrap();
        assert!(negotiated.mac_c2s.is_none());
        assert!(negotiated.mac_s2c.is_none());
        session.close();
    }

    #[test]
    #[ignore]
    fn test_manual_rekey() {
        let session = builder().connect(get_server()).unwrap();
        let id = session.session_id().to_vec();
        session.rekey().unwrap();
        let mut exec = session.open_session().unwrap();
        exec.exec("true").unwrap();
        exec.wait_close().unwrap();
        assert_eq!(session.session_id(), id.as_slice());
        session.close();
    }
}
