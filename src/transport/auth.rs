use std::collections::VecDeque;
use std::io::{Read, Write};

use tracing::*;

use crate::{
    algorithm::PubKey,
    constant::{ssh_connection_code, ssh_str, ssh_transport_code, ssh_user_auth_code},
    error::{SshError, SshResult},
    model::Data,
    util,
};

use super::Transport;

const NONE_METHOD: &str = "none";

impl<S> Transport<S>
where
    S: Read + Write,
{
    /// Run the `ssh-userauth` service until the server lets us in.
    ///
    /// Public key first when a key was given, password otherwise or after the
    /// key was refused, following the methods the server lists.
    pub fn authenticate(&mut self) -> SshResult<()> {
        info!("Auth start");
        let mut data = Data::new();
        data.put_u8(ssh_transport_code::SERVICE_REQUEST)
            .put_str(ssh_str::SSH_USERAUTH);
        self.send(data)?;

        let mut key_algs: VecDeque<PubKey> = match &self.config.auth.key_pair {
            Some(key) => key.algorithms().into(),
            None => VecDeque::new(),
        };
        // the algorithm of the last public key request, if any
        let mut pending_key: Option<PubKey> = None;
        let mut password_tried = false;

        loop {
            let mut data = self.recv_blocking()?;
            let message_code = data.get_u8()?;
            match message_code {
                ssh_transport_code::SERVICE_ACCEPT => {
                    // learn which methods the server takes
                    self.send_auth_request(NONE_METHOD, |_| Ok(()))?;
                }
                ssh_user_auth_code::FAILURE => {
                    let methods = util::vec_u8_to_string(data.get_u8s()?, ",")?;
                    let partial = data.get_bool()?;
                    debug!("auth methods: {:?}, partial success: {}", methods, partial);
                    if let Some(alg) = pending_key.take() {
                        info!("public key {} was refused.", alg.as_ref());
                    }

                    let mut sent = false;
                    if methods.iter().any(|m| m == ssh_str::PUBLIC_KEY) {
                        if let Some(alg) = key_algs.pop_front() {
                            self.public_key_authentication(alg)?;
                            pending_key = Some(alg);
                            sent = true;
                        }
                    }
                    if !sent
                        && !password_tried
                        && methods.iter().any(|m| m == ssh_str::PASSWORD)
                        && !self.config.auth.password.is_empty()
                    {
                        password_tried = true;
                        self.password_authentication()?;
                        sent = true;
                    }
                    if !sent {
                        error!("user auth failure, no method left to try.");
                        return Err(SshError::AuthError);
                    }
                }
                ssh_user_auth_code::PK_OK => {
                    info!("user auth support this algorithm.");
                    match pending_key {
                        Some(alg) => self.public_key_signature(alg)?,
                        None => {
                            let err_msg = "PK_OK without a public key query".to_owned();
                            error!(err_msg);
                            return Err(SshError::ProtocolViolation(err_msg));
                        }
                    }
                }
                ssh_user_auth_code::SUCCESS => {
                    info!("user auth successful.");
                    // <https://www.openssh.com/txt/draft-miller-secsh-compression-delayed-00.txt>
                    self.enable_delayed_compression();
                    return Ok(());
                }
                ssh_user_auth_code::BANNER => {
                    info!("{}", data.get_string()?);
                }
                ssh_connection_code::GLOBAL_REQUEST => {
                    let mut data = Data::new();
                    data.put_u8(ssh_connection_code::REQUEST_FAILURE);
                    self.send(data)?;
                }
                x => debug!("Ignore message {} during authentication", x),
            }
        }
    }

    fn send_auth_request<F>(&mut self, method: &str, fill: F) -> SshResult<()>
    where
        F: FnOnce(&mut Data) -> SshResult<()>,
    {
        let mut data = Data::new();
        data.put_u8(ssh_user_auth_code::REQUEST)
            .put_str(self.config.auth.username.as_str())
            .put_str(ssh_str::SSH_CONNECTION)
            .put_str(method);
        fill(&mut data)?;
        self.send(data)
    }

    fn password_authentication(&mut self) -> SshResult<()> {
        info!("password authentication.");
        let password = self.config.auth.password.clone();
        self.send_auth_request(ssh_str::PASSWORD, |data| {
            data.put_bool(false).put_str(&password);
            Ok(())
        })
    }

    fn public_key_blob(&self) -> SshResult<Vec<u8>> {
        match &self.config.auth.key_pair {
            Some(key) => key.public_blob(),
            None => Err(SshError::AuthError),
        }
    }

    fn public_key_authentication(&mut self, alg: PubKey) -> SshResult<()> {
        info!("public key authentication. algorithm: {}", alg.as_ref());
        let blob = self.public_key_blob()?;
        self.send_auth_request(ssh_str::PUBLIC_KEY, |data| {
            data.put_bool(false).put_str(alg.as_ref()).put_u8s(&blob);
            Ok(())
        })
    }

    fn public_key_signature(&mut self, alg: PubKey) -> SshResult<()> {
        let blob = self.public_key_blob()?;
        let (Some(session_id), Some(key)) = (&self.session_id, &self.config.auth.key_pair) else {
            return Err(SshError::AuthError);
        };

        let mut data = Data::new();
        data.put_u8(ssh_user_auth_code::REQUEST)
            .put_str(self.config.auth.username.as_str())
            .put_str(ssh_str::SSH_CONNECTION)
            .put_str(ssh_str::PUBLIC_KEY)
            .put_bool(true)
            .put_str(alg.as_ref())
            .put_u8s(&blob);

        // signed over `string session_id` followed by the request itself
        let mut signed = Data::new();
        signed.put_u8s(session_id);
        signed.extend_from_slice(&data);
        let signature = key.sign(alg, &signed)?;

        data.put_u8s(&signature);
        self.send(data)
    }
}
