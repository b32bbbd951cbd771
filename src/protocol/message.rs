//! # Protocol Messages
//!
//! Typed frames for both directions of a connection and the interface description
//! exchanged during synchronization.
//!
//! | type                | value | request (client → host)            | response (host → client) |
//! |---------------------|-------|------------------------------------|--------------------------|
//! | TerminateConnection | 0     | -                                  | -                        |
//! | MethodInvocation    | 1     | service:i32, method:i32, params    | n/a                      |
//! | ReturnValues        | 2     | n/a                                | values:blob              |
//! | UnknownMethod       | 3     | n/a                                | -                        |
//! | ThrowException      | 4     | n/a                                | values:blob              |
//! | SyncInterface       | 5     | name:blob                          | sync:blob (empty = miss) |
//! | ZkInitiate          | 6     | username:string, A:blob            | salt:blob, B:blob        |
//! | ZkProof             | 7     | Mc:blob                            | Ms:blob                  |

use crate::core::wire::{self, MessageType};
use crate::error::{Result, RpcError};
use bytes::BytesMut;

/// Shape of a payload field, used to find frame boundaries in a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    I32,
    Blob,
}

/// A message that can be written to and read from the wire.
pub trait WireMessage: Sized {
    /// Payload layout for `msg_type`, or `None` if this direction never carries it.
    fn layout(msg_type: MessageType) -> Option<&'static [Field]>;

    fn message_type(&self) -> MessageType;

    fn encode_payload(&self, dst: &mut BytesMut) -> Result<()>;

    /// Decode a complete payload. `payload` holds exactly the bytes of this frame.
    fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<Self>;
}

/// Client → host frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    TerminateConnection,
    MethodInvocation {
        service: i32,
        method: i32,
        params: Vec<u8>,
    },
    SyncInterface {
        name: Vec<u8>,
    },
    ZkInitiate {
        username: String,
        a: Vec<u8>,
    },
    ZkProof {
        proof: Vec<u8>,
    },
}

/// Host → client frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    TerminateConnection,
    ReturnValues { values: Vec<u8> },
    UnknownMethod,
    ThrowException { values: Vec<u8> },
    SyncInterface { sync: Vec<u8> },
    ZkInitiate { salt: Vec<u8>, b: Vec<u8> },
    ZkProof { proof: Vec<u8> },
}

impl WireMessage for Request {
    fn layout(msg_type: MessageType) -> Option<&'static [Field]> {
        match msg_type {
            MessageType::TerminateConnection => Some(&[]),
            MessageType::MethodInvocation => Some(&[Field::I32, Field::I32, Field::Blob]),
            MessageType::SyncInterface => Some(&[Field::Blob]),
            MessageType::ZkInitiate => Some(&[Field::Blob, Field::Blob]),
            MessageType::ZkProof => Some(&[Field::Blob]),
            MessageType::ReturnValues
            | MessageType::UnknownMethod
            | MessageType::ThrowException => None,
        }
    }

    fn message_type(&self) -> MessageType {
        match self {
            Request::TerminateConnection => MessageType::TerminateConnection,
            Request::MethodInvocation { .. } => MessageType::MethodInvocation,
            Request::SyncInterface { .. } => MessageType::SyncInterface,
            Request::ZkInitiate { .. } => MessageType::ZkInitiate,
            Request::ZkProof { .. } => MessageType::ZkProof,
        }
    }

    fn encode_payload(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Request::TerminateConnection => Ok(()),
            Request::MethodInvocation {
                service,
                method,
                params,
            } => {
                wire::put_i32(dst, *service);
                wire::put_i32(dst, *method);
                wire::put_blob(dst, params)
            }
            Request::SyncInterface { name } => wire::put_blob(dst, name),
            Request::ZkInitiate { username, a } => {
                wire::put_string(dst, username)?;
                wire::put_blob(dst, a)
            }
            Request::ZkProof { proof } => wire::put_blob(dst, proof),
        }
    }

    fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<Self> {
        let mut src = payload;
        let msg = match msg_type {
            MessageType::TerminateConnection => Request::TerminateConnection,
            MessageType::MethodInvocation => Request::MethodInvocation {
                service: wire::get_i32(&mut src)?,
                method: wire::get_i32(&mut src)?,
                params: wire::get_blob(&mut src)?,
            },
            MessageType::SyncInterface => Request::SyncInterface {
                name: wire::get_blob(&mut src)?,
            },
            MessageType::ZkInitiate => Request::ZkInitiate {
                username: wire::get_string(&mut src)?,
                a: wire::get_blob(&mut src)?,
            },
            MessageType::ZkProof => Request::ZkProof {
                proof: wire::get_blob(&mut src)?,
            },
            MessageType::ReturnValues
            | MessageType::UnknownMethod
            | MessageType::ThrowException => return Err(RpcError::UnexpectedMessage),
        };
        wire::expect_end(&src)?;
        Ok(msg)
    }
}

impl WireMessage for Response {
    fn layout(msg_type: MessageType) -> Option<&'static [Field]> {
        match msg_type {
            MessageType::TerminateConnection | MessageType::UnknownMethod => Some(&[]),
            MessageType::ReturnValues
            | MessageType::ThrowException
            | MessageType::SyncInterface
            | MessageType::ZkProof => Some(&[Field::Blob]),
            MessageType::ZkInitiate => Some(&[Field::Blob, Field::Blob]),
            MessageType::MethodInvocation => None,
        }
    }

    fn message_type(&self) -> MessageType {
        match self {
            Response::TerminateConnection => MessageType::TerminateConnection,
            Response::ReturnValues { .. } => MessageType::ReturnValues,
            Response::UnknownMethod => MessageType::UnknownMethod,
            Response::ThrowException { .. } => MessageType::ThrowException,
            Response::SyncInterface { .. } => MessageType::SyncInterface,
            Response::ZkInitiate { .. } => MessageType::ZkInitiate,
            Response::ZkProof { .. } => MessageType::ZkProof,
        }
    }

    fn encode_payload(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Response::TerminateConnection | Response::UnknownMethod => Ok(()),
            Response::ReturnValues { values } | Response::ThrowException { values } => {
                wire::put_blob(dst, values)
            }
            Response::SyncInterface { sync } => wire::put_blob(dst, sync),
            Response::ZkInitiate { salt, b } => {
                wire::put_blob(dst, salt)?;
                wire::put_blob(dst, b)
            }
            Response::ZkProof { proof } => wire::put_blob(dst, proof),
        }
    }

    fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<Self> {
        let mut src = payload;
        let msg = match msg_type {
            MessageType::TerminateConnection => Response::TerminateConnection,
            MessageType::UnknownMethod => Response::UnknownMethod,
            MessageType::ReturnValues => Response::ReturnValues {
                values: wire::get_blob(&mut src)?,
            },
            MessageType::ThrowException => Response::ThrowException {
                values: wire::get_blob(&mut src)?,
            },
            MessageType::SyncInterface => Response::SyncInterface {
                sync: wire::get_blob(&mut src)?,
            },
            MessageType::ZkInitiate => Response::ZkInitiate {
                salt: wire::get_blob(&mut src)?,
                b: wire::get_blob(&mut src)?,
            },
            MessageType::ZkProof => Response::ZkProof {
                proof: wire::get_blob(&mut src)?,
            },
            MessageType::MethodInvocation => return Err(RpcError::UnexpectedMessage),
        };
        wire::expect_end(&src)?;
        Ok(msg)
    }
}

/// Summary of one remotely callable method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSyncInfo {
    pub ordinal: i32,
    pub name: String,
    pub return_type: String,
    pub parameter_types: Vec<String>,
}

/// What a client learns about a service when it synchronizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSyncInfo {
    pub service_ordinal: i32,
    pub use_compression: bool,
    pub compression_threshold: i32,
    pub methods: Vec<MethodSyncInfo>,
}

impl ServiceSyncInfo {
    /// Find a method by name and exact parameter type names.
    pub fn find_method<S: AsRef<str>>(
        &self,
        name: &str,
        parameter_types: &[S],
    ) -> Option<&MethodSyncInfo> {
        self.methods.iter().find(|m| {
            m.name == name
                && m.parameter_types.len() == parameter_types.len()
                && m.parameter_types
                    .iter()
                    .zip(parameter_types)
                    .all(|(have, want)| have == want.as_ref())
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        wire::put_i32(&mut out, self.service_ordinal);
        out.extend_from_slice(&[u8::from(self.use_compression)]);
        wire::put_i32(&mut out, self.compression_threshold);
        wire::put_i32(&mut out, len_i32(self.methods.len())?);
        for method in &self.methods {
            wire::put_i32(&mut out, method.ordinal);
            wire::put_string(&mut out, &method.name)?;
            wire::put_string(&mut out, &method.return_type)?;
            wire::put_i32(&mut out, len_i32(method.parameter_types.len())?);
            for param in &method.parameter_types {
                wire::put_string(&mut out, param)?;
            }
        }
        Ok(out.to_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut src = data;
        let service_ordinal = wire::get_i32(&mut src)?;
        let use_compression = wire::get_u8(&mut src)? != 0;
        let compression_threshold = wire::get_i32(&mut src)?;

        let method_count = count(&mut src)?;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            let ordinal = wire::get_i32(&mut src)?;
            let name = wire::get_string(&mut src)?;
            let return_type = wire::get_string(&mut src)?;
            let param_count = count(&mut src)?;
            let mut parameter_types = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                parameter_types.push(wire::get_string(&mut src)?);
            }
            methods.push(MethodSyncInfo {
                ordinal,
                name,
                return_type,
                parameter_types,
            });
        }
        wire::expect_end(&src)?;

        Ok(Self {
            service_ordinal,
            use_compression,
            compression_threshold,
            methods,
        })
    }
}

fn len_i32(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| RpcError::OversizedPacket(len))
}

// Element counts are bounded by the remaining input: each element takes at least 4 bytes.
fn count(src: &mut &[u8]) -> Result<usize> {
    let n = wire::get_i32(src)?;
    if n < 0 || n as usize > src.len() / 4 {
        return Err(RpcError::InvalidFrame(format!("Implausible element count: {n}")));
    }
    Ok(n as usize)
}
