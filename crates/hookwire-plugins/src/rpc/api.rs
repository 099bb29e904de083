//! Host API stub and skeleton.

use std::sync::Arc;
use std::time::Duration;

use hookwire_bridge::{RemoteError, RequestHandler, RpcClient, decode_params, encode_result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{HostApi, KvSetOptions, LogLevel};
use crate::manifest::ConfigSetting;

const KV_SET_WITH_OPTIONS: &str = "kv_set_with_options";
const KV_GET: &str = "kv_get";
const KV_DELETE: &str = "kv_delete";
const KV_DELETE_ALL: &str = "kv_delete_all";
const KV_LIST: &str = "kv_list";
const LOAD_CONFIGURATION: &str = "load_configuration";
const LOG: &str = "log";

#[derive(Debug, Serialize, Deserialize)]
struct KvSetArgs {
    key: String,
    value: Option<Vec<u8>>,
    options: KvSetOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyArgs {
    key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListArgs {
    page: u32,
    per_page: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogArgs {
    level: LogLevel,
    message: String,
}

/// Plugin-side [`HostApi`] that forwards each call over the API stream.
#[derive(Debug)]
pub struct ApiClient {
    rpc: RpcClient,
    deadline: Option<Duration>,
}

impl ApiClient {
    /// Wraps a client dialled on the API stream.
    #[must_use]
    pub const fn new(rpc: RpcClient, deadline: Option<Duration>) -> Self {
        Self { rpc, deadline }
    }

    fn call<P: Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<R, RemoteError> {
        self.rpc
            .call(method, params, self.deadline)
            .map_err(super::into_remote)
    }
}

impl HostApi for ApiClient {
    fn kv_set_with_options(
        &self,
        key: &str,
        value: Option<&[u8]>,
        options: &KvSetOptions,
    ) -> Result<bool, RemoteError> {
        let args = KvSetArgs {
            key: key.to_owned(),
            value: value.map(<[u8]>::to_vec),
            options: options.clone(),
        };
        self.call(KV_SET_WITH_OPTIONS, &args)
    }

    fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.call(KV_GET, &KeyArgs { key: key.to_owned() })
    }

    fn kv_delete(&self, key: &str) -> Result<(), RemoteError> {
        self.call(KV_DELETE, &KeyArgs { key: key.to_owned() })
    }

    fn kv_delete_all(&self) -> Result<(), RemoteError> {
        self.call(KV_DELETE_ALL, &())
    }

    fn kv_list(&self, page: u32, per_page: u32) -> Result<Vec<String>, RemoteError> {
        self.call(KV_LIST, &ListArgs { page, per_page })
    }

    fn load_configuration(&self) -> Result<Vec<ConfigSetting>, RemoteError> {
        self.call(LOAD_CONFIGURATION, &())
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<(), RemoteError> {
        let args = LogArgs {
            level,
            message: message.to_owned(),
        };
        self.call(LOG, &args)
    }
}

/// Host-side handler serving a [`HostApi`] on the API stream.
pub struct ApiServer {
    api: Arc<dyn HostApi>,
}

impl ApiServer {
    /// Serves `api`.
    #[must_use]
    pub fn new(api: Arc<dyn HostApi>) -> Self {
        Self { api }
    }
}

impl RequestHandler for ApiServer {
    fn handle(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        match method {
            KV_SET_WITH_OPTIONS => {
                let args: KvSetArgs = decode_params(params)?;
                encode_result(&self.api.kv_set_with_options(
                    &args.key,
                    args.value.as_deref(),
                    &args.options,
                )?)
            }
            KV_GET => {
                let args: KeyArgs = decode_params(params)?;
                encode_result(&self.api.kv_get(&args.key)?)
            }
            KV_DELETE => {
                let args: KeyArgs = decode_params(params)?;
                encode_result(&self.api.kv_delete(&args.key)?)
            }
            KV_DELETE_ALL => encode_result(&self.api.kv_delete_all()?),
            KV_LIST => {
                let args: ListArgs = decode_params(params)?;
                encode_result(&self.api.kv_list(args.page, args.per_page)?)
            }
            LOAD_CONFIGURATION => encode_result(&self.api.load_configuration()?),
            LOG => {
                let args: LogArgs = decode_params(params)?;
                encode_result(&self.api.log(args.level, &args.message)?)
            }
            other => Err(RemoteError::MethodNotFound {
                method: other.to_owned(),
            }),
        }
    }
}
