//! Client and server transports wired back to back over an in-memory pipe

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::{
    algorithm::{
        key_exchange::{Curve25519, KeyExchange},
        public_key::KeyPair,
        ComponentRegistry,
    },
    config::{ChannelDefaults, Config, RekeyPolicy},
    constant::{ssh_connection_code, ssh_str},
    error::{SshError, SshResult},
    event::SshEvent,
    model::{BackendRqst, Data, Timeout},
    session::start_backend,
    transport::{Role, Transport},
};

#[derive(Clone, Default)]
struct Pipe(Arc<Mutex<VecDeque<u8>>>);

/// one end of a non-blocking byte pipe
struct Duplex {
    incoming: Pipe,
    outgoing: Pipe,
}

fn duplex() -> (Duplex, Duplex) {
    let (a, b) = (Pipe::default(), Pipe::default());
    (
        Duplex {
            incoming: a.clone(),
            outgoing: b.clone(),
        },
        Duplex {
            incoming: b,
            outgoing: a,
        },
    )
}

impl Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.incoming.0.lock().unwrap();
        if queue.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let len = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.0.lock().unwrap().extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn client_config() -> Config {
    Config {
        timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    }
}

fn server_config() -> Config {
    Config {
        timeout: Some(Duration::from_secs(10)),
        host_key: Some(KeyPair::generate_ed25519().unwrap()),
        ..Default::default()
    }
}

type Handshake = SshResult<Transport<Duplex>>;

fn handshake(client: Config, server: Config) -> (Handshake, Handshake) {
    let (c, s) = duplex();
    let server = thread::spawn(move || {
        let mut transport = Transport::new(s, Role::Server, server);
        transport.handshake().map(|_| transport)
    });
    let mut transport = Transport::new(c, Role::Client, client);
    let client = transport.handshake().map(|_| transport);
    (client, server.join().unwrap())
}

fn connected(client: Config, server: Config) -> (Transport<Duplex>, Transport<Duplex>) {
    let (client, server) = handshake(client, server);
    (client.unwrap(), server.unwrap())
}

/// key exchanges named `names`, all backed by curve25519
fn kex_registry(names: &[&'static str]) -> ComponentRegistry {
    let registry = ComponentRegistry::builtin_unlocked();
    registry.key_exchanges().clear().unwrap();
    for name in names {
        registry
            .key_exchanges()
            .add(name, || {
                Ok(Box::new(Curve25519::new()?) as Box<dyn KeyExchange>)
            })
            .unwrap();
    }
    registry
}

/// the next connection layer message, window adjustments skipped
fn expect(server: &mut Transport<Duplex>, code: u8) -> Data {
    loop {
        let mut data = server.recv_blocking().unwrap();
        let got = data.get_u8().unwrap();
        if got == ssh_connection_code::CHANNEL_WINDOW_ADJUST {
            continue;
        }
        assert_eq!(got, code);
        return data;
    }
}

/// confirm the channel the client opens, returns the client's id for it
fn confirm_open(server: &mut Transport<Duplex>, server_id: u32) -> u32 {
    let mut open = expect(server, ssh_connection_code::CHANNEL_OPEN);
    assert_eq!(open.get_string().unwrap(), ssh_str::SESSION);
    let client_id = open.get_u32().unwrap();

    let mut data = Data::new();
    data.put_u8(ssh_connection_code::CHANNEL_OPEN_CONFIRMATION)
        .put_u32(client_id)
        .put_u32(server_id)
        .put_u32(1 << 20)
        .put_u32(32768);
    server.send(data).unwrap();
    client_id
}

fn init_log() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn wait_until<F: Fn() -> bool>(f: F) {
    let mut timeout = Timeout::new(Some(Duration::from_secs(10)));
    while !f() {
        timeout.till_next_tick().unwrap();
    }
}

#[test]
fn client_preference_picks_the_kex() {
    init_log();
    let mut client = client_config();
    client.registry = kex_registry(&["kex-a", "kex-b"]);
    client.algs.kex = Some("kex-b".to_owned());
    let mut server = server_config();
    server.registry = kex_registry(&["kex-a", "kex-b"]);

    let (client, server) = connected(client, server);
    assert_eq!(client.negotiated().unwrap().kex, "kex-b");
    assert_eq!(server.negotiated().unwrap().kex, "kex-b");
    assert_eq!(client.session_id(), server.session_id());
    assert_eq!(client.negotiated(), server.negotiated());
}

#[test]
fn no_common_kex_fails_both_sides() {
    init_log();
    let mut client = client_config();
    client.registry = kex_registry(&["kex-a"]);
    let mut server = server_config();
    server.registry = kex_registry(&["kex-b"]);

    let (client, server) = handshake(client, server);
    assert!(matches!(client, Err(SshError::KexError(_))));
    assert!(matches!(server, Err(SshError::KexError(_))));
}

#[test]
fn rekey_is_transparent() {
    init_log();
    let rounds = Arc::new(Mutex::new(vec![]));
    let config = client_config();
    {
        let rounds = rounds.clone();
        config.events.add(move |event: &SshEvent| {
            if let SshEvent::KexCompleted { rekey, .. } = event {
                rounds.lock().unwrap().push(*rekey);
            }
        });
    }
    let (mut client, server) = connected(config, server_config());
    let session_id = client.session_id().unwrap().to_vec();

    let server = thread::spawn(move || {
        let mut server = server;
        let mut seen = vec![];
        while seen.len() < 6 {
            let mut data = server.recv_blocking().unwrap();
            assert_eq!(data.get_u8().unwrap(), 192);
            seen.push(data.get_u32().unwrap());
        }
        (server, seen)
    });

    for i in 0..3 {
        client.send(numbered(i)).unwrap();
    }
    client.rekey().unwrap();
    // held back until our NEWKEYS went out
    for i in 3..6 {
        client.send(numbered(i)).unwrap();
    }
    let mut timeout = Timeout::new(Some(Duration::from_secs(10)));
    while client.kex_rounds() < 2 {
        assert!(client.recv().unwrap().is_none());
        timeout.till_next_tick().unwrap();
    }

    let (server, seen) = server.join().unwrap();
    assert_eq!(seen, (0..6).collect::<Vec<u32>>());
    assert_eq!(server.kex_rounds(), 2);
    assert_eq!(client.session_id(), Some(session_id.as_slice()));
    assert_eq!(server.session_id(), Some(session_id.as_slice()));
    assert_eq!(*rounds.lock().unwrap(), vec![false, true]);
}

fn numbered(i: u32) -> Data {
    let mut data = Data::new();
    data.put_u8(192).put_u32(i);
    data
}

#[test]
fn packet_threshold_rekeys_by_itself() {
    init_log();
    let mut config = client_config();
    config.rekey = RekeyPolicy {
        max_packets: 4,
        ..Default::default()
    };
    let (mut client, server) = connected(config, server_config());
    let session_id = client.session_id().unwrap().to_vec();

    let server = thread::spawn(move || {
        let mut server = server;
        for i in 0..20 {
            server.send(numbered(i)).unwrap();
        }
        let mut seen = vec![];
        while seen.len() < 20 {
            let mut data = server.recv_blocking().unwrap();
            assert_eq!(data.get_u8().unwrap(), 192);
            seen.push(data.get_u32().unwrap());
        }
        (server, seen)
    });

    // nobody asks for a key exchange, the fifth packet does
    for i in 0..20 {
        client.send(numbered(i)).unwrap();
    }
    let mut seen = vec![];
    let mut timeout = Timeout::new(Some(Duration::from_secs(10)));
    while seen.len() < 20 || client.kex_rounds() < 2 {
        match client.recv().unwrap() {
            Some(mut data) => {
                assert_eq!(data.get_u8().unwrap(), 192);
                seen.push(data.get_u32().unwrap());
            }
            None => timeout.till_next_tick().unwrap(),
        }
    }

    let (server, server_seen) = server.join().unwrap();
    assert_eq!(seen, (0..20).collect::<Vec<u32>>());
    assert_eq!(server_seen, (0..20).collect::<Vec<u32>>());
    assert!(client.kex_rounds() > 1);
    assert!(server.kex_rounds() > 1);
    assert_eq!(client.session_id(), Some(session_id.as_slice()));
    assert_eq!(server.session_id(), Some(session_id.as_slice()));
}

#[test]
fn exec_round_trip() {
    init_log();
    let (client, mut server) = connected(client_config(), server_config());
    let session_id = server.session_id().unwrap().to_vec();
    let (handle, backend) = start_backend(client).unwrap();
    assert_eq!(handle.session_id(), session_id.as_slice());

    let consumer = {
        let handle = handle.clone();
        thread::spawn(move || -> SshResult<(String, Option<u32>)> {
            let mut channel = handle.open_session()?;
            channel.exec("cat")?;
            channel.write_all(b"ping")?;
            channel.send_eof()?;
            let mut output = String::new();
            channel.read_to_string(&mut output)?;
            channel.wait_close()?;
            Ok((output, channel.exit_status()))
        })
    };

    let client_id = confirm_open(&mut server, 7);

    let mut request = expect(&mut server, ssh_connection_code::CHANNEL_REQUEST);
    assert_eq!(request.get_u32().unwrap(), 7);
    assert_eq!(request.get_string().unwrap(), ssh_str::EXEC);
    assert!(request.get_bool().unwrap());
    assert_eq!(request.get_string().unwrap(), "cat");
    let mut data = Data::new();
    data.put_u8(ssh_connection_code::CHANNEL_SUCCESS)
        .put_u32(client_id);
    server.send(data).unwrap();

    let mut input = expect(&mut server, ssh_connection_code::CHANNEL_DATA);
    assert_eq!(input.get_u32().unwrap(), 7);
    assert_eq!(input.get_u8s().unwrap(), b"ping");
    expect(&mut server, ssh_connection_code::CHANNEL_EOF);

    let mut data = Data::new();
    data.put_u8(ssh_connection_code::CHANNEL_DATA)
        .put_u32(client_id)
        .put_u8s(b"pong");
    server.send(data).unwrap();
    let mut data = Data::new();
    data.put_u8(ssh_connection_code::CHANNEL_EOF).put_u32(client_id);
    server.send(data).unwrap();
    let mut data = Data::new();
    data.put_u8(ssh_connection_code::CHANNEL_REQUEST)
        .put_u32(client_id)
        .put_str(ssh_str::EXIT_STATUS)
        .put_bool(false)
        .put_u32(3);
    server.send(data).unwrap();
    let mut data = Data::new();
    data.put_u8(ssh_connection_code::CHANNEL_CLOSE)
        .put_u32(client_id);
    server.send(data).unwrap();

    let mut close = expect(&mut server, ssh_connection_code::CHANNEL_CLOSE);
    assert_eq!(close.get_u32().unwrap(), 7);

    let (output, status) = consumer.join().unwrap().unwrap();
    assert_eq!(output, "pong");
    assert_eq!(status, Some(3));

    drop(server);
    handle.request(BackendRqst::Disconnect).unwrap();
    backend.join().unwrap();
    assert!(handle.is_closed());
}

#[test]
fn window_overrun_ends_the_session() {
    init_log();
    let mut config = client_config();
    config.channel = ChannelDefaults {
        window_size: 16,
        max_packet: 32768,
    };
    let (client, mut server) = connected(config, server_config());
    let (handle, backend) = start_backend(client).unwrap();

    let consumer = {
        let handle = handle.clone();
        thread::spawn(move || {
            let mut channel = handle.open_session()?;
            let mut sink = vec![];
            channel.read_to_end(&mut sink)?;
            Ok::<_, SshError>(sink)
        })
    };

    let client_id = confirm_open(&mut server, 0);
    let mut data = Data::new();
    data.put_u8(ssh_connection_code::CHANNEL_DATA)
        .put_u32(client_id)
        .put_u8s(&[0_u8; 17]);
    server.send(data).unwrap();

    // the client gives up on the connection
    let mut timeout = Timeout::new(Some(Duration::from_secs(10)));
    let goodbye = loop {
        match server.recv() {
            Ok(Some(_)) => continue,
            Ok(None) => timeout.till_next_tick().unwrap(),
            Err(e) => break e,
        }
    };
    assert!(matches!(goodbye, SshError::Disconnected(_)));

    backend.join().unwrap();
    wait_until(|| handle.is_closed());
    // none of the 17 bytes was delivered
    assert!(!matches!(consumer.join().unwrap(), Ok(sink) if !sink.is_empty()));
    assert!(handle.open_session().is_err());
}
