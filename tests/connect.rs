//! Against a live server, run with `cargo test -- --ignored`
mod tests {
    use paste::paste;
    use ssh::{SessionBuilder, SshEvent};
    use std::env;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::{Arc, Mutex};

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
    env_getter!(passwd, "password");
    env_getter!(server, "127.0.0.1:22");
    env_getter!(pem_rsa, "./rsa_old");
    env_getter!(openssh_rsa, "./rsa_new");
    env_getter!(ed25519, "./ed25519");
    // something the server can reach that echoes what it gets
    env_getter!(echo_host, "127.0.0.1");
    env_getter!(echo_port, "7");

    fn init_log() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init();
    }

    #[test]
    #[ignore]
    fn test_password() {
        init_log();
        let session = SessionBuilder::new()
            .username(&get_username())
            .password(&get_passwd())
            .connect(get_server())
            .unwrap();
        session.close();
    }

    macro_rules! key_file {
        ($name:ident) => {
            paste! {
                #[test]
                #[ignore]
                fn [<test_ $name>]() {
                    let session = SessionBuilder::new()
                        .username(&get_username())
                        .private_key_path([<get_ $name>]())
                        .connect(get_server())
                        .unwrap();
                    session.close();
                }
            }
        };
    }
    key_file!(pem_rsa);
    key_file!(openssh_rsa);
    key_file!(ed25519);

    #[test]
    #[ignore]
    fn test_pubkey_fallback() {
        let session = SessionBuilder::new()
            .username(&get_username())
            .password(&get_passwd())
            .private_key_path("")
            .connect(get_server())
            .unwrap();
        session.close();
    }

    #[test]
    #[ignore]
    fn test_exec() {
        init_log();
        let session = SessionBuilder::new()
            .username(&get_username())
            .password(&get_passwd())
            .connect(get_server())
            .unwrap();
        let mut exec = session.open_session().unwrap();
        exec.exec("echo hello; exit 3").unwrap();
        let mut output = String::new();
        exec.read_to_string(&mut output).unwrap();
        exec.wait_close().unwrap();
        assert_eq!(output.trim(), "hello");
        assert_eq!(exec.exit_status(), Some(3));
        session.close();
    }

    #[test]
    #[ignore]
    fn test_channels_are_independent() {
        let session = SessionBuilder::new()
            .username(&get_username())
            .password(&get_passwd())
            .connect(get_server())
            .unwrap();
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let handle = session.handle();
                std::thread::spawn(move || {
                    let mut exec = handle.open_session().unwrap();
                    exec.exec(&format!("echo {}", i)).unwrap();
                    let mut output = String::new();
                    exec.read_to_string(&mut output).unwrap();
                    assert_eq!(output.trim(), i.to_string());
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        session.close();
    }

    #[test]
    #[ignore]
    fn test_local_forwarding() {
        init_log();
        let events = Arc::new(Mutex::new(vec![]));
        let seen = events.clone();
        let session = SessionBuilder::new()
            .username(&get_username())
            .password(&get_passwd())
            .event_listener(move |event: &SshEvent| seen.lock().unwrap().push(format!("{:?}", event)))
            .connect(get_server())
            .unwrap();

        let forwarding = session.forwarding();
        let port = forwarding
            .start_local_forwarding_on_random_port(
                "127.0.0.1",
                &get_echo_host(),
                get_echo_port().parse().unwrap(),
                10,
            )
            .unwrap();

        let mut socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        socket.write_all(b"ping").unwrap();
        let mut buf = [0_u8; 4];
        socket.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(forwarding.outgoing_tunnels().len(), 1);

        forwarding.stop_all_local_forwarding().unwrap();
        assert!(forwarding.local_forwardings().is_empty());
        session.close();
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.starts_with("TunnelOpened")));
    }

    #[test]
    #[ignore]
    fn test_remote_forwarding() {
        let session = SessionBuilder::new()
            .username(&get_username())
            .password(&get_passwd())
            .connect(get_server())
            .unwrap();
        let forwarding = session.forwarding();
        let port = forwarding
            .request_remote_forwarding("127.0.0.1", 0, &get_echo_host(), get_echo_port().parse().unwrap())
            .unwrap();
        assert_ne!(port, 0);
        assert_eq!(forwarding.remote_forwardings(), vec![format!("127.0.0.1:{}", port)]);
        forwarding.cancel_remote_forwarding("127.0.0.1", port).unwrap();
        session.close();
    }
}
