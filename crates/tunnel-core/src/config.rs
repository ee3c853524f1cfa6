//! Shape of the configuration line the server sends in response to the
//! client's metadata handshake line: `{"bind": [{"family": F, "protocol": T,
//! "port": P}, ...]}`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BindConfig {
    pub bind: Vec<BindSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindSpec {
    pub family: u8,
    pub protocol: u8,
    pub port: u16,
}
