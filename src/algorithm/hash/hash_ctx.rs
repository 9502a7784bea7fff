use crate::model::Data;

/// <https://www.rfc-editor.org/rfc/rfc4253#section-7.2>
///
/// The key exchange produces two values: a shared secret K, and an
/// exchange hash H.  Encryption and authentication keys are derived from
/// these.  The exchange hash H from the first key exchange is
/// additionally used as the session identifier, which is a unique
/// identifier for this connection.  Once computed, the session identifier
/// is not changed, even if keys are later re-exchanged.
///
/// H = hash(V_C || V_S || I_C || I_S || K_S || e || f || K)
///
/// Every field is stored already encoded, so [HashCtx::as_bytes] is a plain
/// concatenation.
#[derive(Clone, Debug, Default)]
pub(crate) struct HashCtx {
    /// string    V_C, the client's identification string (CR and LF excluded)
    v_c: Vec<u8>,
    /// string    V_S, the server's identification string (CR and LF excluded)
    v_s: Vec<u8>,

    /// string    I_C, the payload of the client's SSH_MSG_KEXINIT
    i_c: Vec<u8>,
    /// string    I_S, the payload of the server's SSH_MSG_KEXINIT
    i_s: Vec<u8>,

    /// string    K_S, the host key
    k_s: Vec<u8>,

    /// exchange value sent by the client, `string Q_C` for ECDH, `mpint e` for DH
    e: Vec<u8>,
    /// exchange value sent by the server, `string Q_S` for ECDH, `mpint f` for DH
    f: Vec<u8>,

    /// mpint     K, the shared secret
    k: Vec<u8>,
}

fn encode(v: &[u8], mpint: bool) -> Vec<u8> {
    let mut data = Data::new();
    if mpint {
        data.put_mpint(v);
    } else {
        data.put_u8s(v);
    }
    data.into_inner()
}

impl HashCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_v_c(&mut self, vc: &str) {
        self.v_c = encode(vc.as_bytes(), false);
    }

    pub fn set_v_s(&mut self, vs: &str) {
        self.v_s = encode(vs.as_bytes(), false);
    }

    pub fn set_i_c(&mut self, ic: &[u8]) {
        self.i_c = encode(ic, false);
    }

    pub fn set_i_s(&mut self, is: &[u8]) {
        self.i_s = encode(is, false);
    }

    pub fn set_k_s(&mut self, ks: &[u8]) {
        self.k_s = encode(ks, false);
    }

    pub fn set_e(&mut self, qc: &[u8], mpint: bool) {
        self.e = encode(qc, mpint);
    }

    pub fn set_f(&mut self, qs: &[u8], mpint: bool) {
        self.f = encode(qs, mpint);
    }

    pub fn set_k(&mut self, k: &[u8]) {
        self.k = encode(k, true);
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        [
            &self.v_c, &self.v_s, &self.i_c, &self.i_s, &self.k_s, &self.e, &self.f, &self.k,
        ]
        .iter()
        .fold(vec![], |mut v, part| {
            v.extend(part.iter());
            v
        })
    }
}

impl Drop for HashCtx {
    fn drop(&mut self) {
        self.k.iter_mut().for_each(|b| *b = 0);
    }
}
