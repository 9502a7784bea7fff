/// The client version
pub(crate) const CLIENT_VERSION: &str = concat!("SSH-2.0-SSH_MUX-", env!("CARGO_PKG_VERSION"));
pub(crate) const SSH_MAGIC: &[u8] = b"SSH-";

/// ssh通讯时用到的常量字符串
pub(crate) mod ssh_str {
    /// 准备认证
    pub const SSH_USERAUTH: &str = "ssh-userauth";
    /// 开始认证
    pub const SSH_CONNECTION: &str = "ssh-connection";
    /// 公钥验证方式
    pub const PUBLIC_KEY: &str = "publickey";
    /// 密码认证方式
    pub const PASSWORD: &str = "password";
    /// 打开一个会话
    pub const SESSION: &str = "session";
    pub const DIRECT_TCPIP: &str = "direct-tcpip";
    pub const FORWARDED_TCPIP: &str = "forwarded-tcpip";
    pub const X11: &str = "x11";
    /// 启动一个命令解释程序
    pub const SHELL: &str = "shell";
    /// 执行一个命令
    pub const EXEC: &str = "exec";
    /// 请求一个伪终端
    pub const PTY_REQ: &str = "pty-req";
    /// 启动一个子系统
    pub const SUBSYSTEM: &str = "subsystem";
    pub const WINDOW_CHANGE: &str = "window-change";
    pub const X11_REQ: &str = "x11-req";
    pub const EXIT_STATUS: &str = "exit-status";
    pub const EXIT_SIGNAL: &str = "exit-signal";
    pub const TCPIP_FORWARD: &str = "tcpip-forward";
    pub const CANCEL_TCPIP_FORWARD: &str = "cancel-tcpip-forward";
    /// 伪终端的样式
    pub const XTERM_VAR: &str = "xterm-256color";
    pub const MIT_MAGIC_COOKIE: &str = "MIT-MAGIC-COOKIE-1";
}

/// 一些默认大小
pub(crate) mod size {
    /// 最大数据包大小
    pub const BUF_SIZE: usize = 32768;
    /// 默认客户端的窗口大小
    pub const LOCAL_WINDOW_SIZE: u32 = 2097152;
    /// upper bound for a declared packet length
    pub const MAX_PACKET_LEN: usize = 256 * 1024;
    /// how many extra cipher blocks of random padding may be added
    pub const MAX_EXTRA_PADDING_BLOCKS: usize = 3;
    pub const MIN_PADDING: usize = 4;
    pub const COOKIE_LEN: usize = 16;
}

/// re-key thresholds, RFC 4253 section 9
pub(crate) mod rekey {
    pub const ONE_GB: u64 = 1 << 30;
    pub const MAX_PACKETS: u64 = 1 << 31;
}

pub(crate) mod forwarding {
    pub const EPHEMERAL_PORT_MIN: u16 = 49152;
    pub const EPHEMERAL_PORT_MAX: u16 = 65535;
    pub const X11_BASE_PORT: u16 = 6000;
    pub const X11_KEY: &str = "x11";
    pub const X11_UNIX_DIR: &str = "/tmp/.X11-unix";
}

/// <https://www.rfc-editor.org/rfc/rfc4253#section-12>
pub(crate) mod ssh_transport_code {
    pub const DISCONNECT: u8 = 1;
    pub const IGNORE: u8 = 2;
    pub const UNIMPLEMENTED: u8 = 3;
    pub const DEBUG: u8 = 4;
    pub const SERVICE_REQUEST: u8 = 5;
    pub const SERVICE_ACCEPT: u8 = 6;
    pub const EXT_INFO: u8 = 7;
    pub const KEXINIT: u8 = 20;
    pub const NEWKEYS: u8 = 21;
    pub const KEXDH_INIT: u8 = 30;
    pub const KEXDH_REPLY: u8 = 31;
}

/// <https://www.rfc-editor.org/rfc/rfc4252#section-6>
pub(crate) mod ssh_user_auth_code {
    pub const REQUEST: u8 = 50;
    pub const FAILURE: u8 = 51;
    pub const SUCCESS: u8 = 52;
    pub const BANNER: u8 = 53;
    pub const PK_OK: u8 = 60;
}

/// <https://www.rfc-editor.org/rfc/rfc4254#section-9>
pub(crate) mod ssh_connection_code {
    pub const GLOBAL_REQUEST: u8 = 80;
    pub const REQUEST_SUCCESS: u8 = 81;
    pub const REQUEST_FAILURE: u8 = 82;
    pub const CHANNEL_OPEN: u8 = 90;
    pub const CHANNEL_OPEN_CONFIRMATION: u8 = 91;
    pub const CHANNEL_OPEN_FAILURE: u8 = 92;
    pub const CHANNEL_WINDOW_ADJUST: u8 = 93;
    pub const CHANNEL_DATA: u8 = 94;
    pub const CHANNEL_EXTENDED_DATA: u8 = 95;
    pub const CHANNEL_EOF: u8 = 96;
    pub const CHANNEL_CLOSE: u8 = 97;
    pub const CHANNEL_REQUEST: u8 = 98;
    pub const CHANNEL_SUCCESS: u8 = 99;
    pub const CHANNEL_FAILURE: u8 = 100;
}

/// <https://www.rfc-editor.org/rfc/rfc4253#section-11.1>
#[allow(dead_code)]
pub(crate) mod ssh_disconnection_code {
    pub const HOST_NOT_ALLOWED_TO_CONNECT: u32 = 1;
    pub const PROTOCOL_ERROR: u32 = 2;
    pub const KEY_EXCHANGE_FAILED: u32 = 3;
    pub const RESERVED: u32 = 4;
    pub const MAC_ERROR: u32 = 5;
    pub const COMPRESSION_ERROR: u32 = 6;
    pub const SERVICE_NOT_AVAILABLE: u32 = 7;
    pub const PROTOCOL_VERSION_NOT_SUPPORTED: u32 = 8;
    pub const HOST_KEY_NOT_VERIFIABLE: u32 = 9;
    pub const CONNECTION_LOST: u32 = 10;
    pub const BY_APPLICATION: u32 = 11;
    pub const TOO_MANY_CONNECTIONS: u32 = 12;
    pub const AUTH_CANCELLED_BY_USER: u32 = 13;
    pub const NO_MORE_AUTH_METHODS_AVAILABLE: u32 = 14;
    pub const ILLEGAL_USER_NAME: u32 = 15;
}

/// extended data type codes of SSH_MSG_CHANNEL_EXTENDED_DATA
pub(crate) mod ssh_extended_data {
    pub const STDERR: u32 = 1;
}

/// 密钥交换后进行HASH时候需要的常量值
pub(crate) const ALPHABET: [u8; 6] = [b'A', b'B', b'C', b'D', b'E', b'F'];
