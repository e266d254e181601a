//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of midtools.
//
// midtools is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public  License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// midtools is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// midtools. If not, see <http://www.gnu.org/licenses/>.

//! Client side of the SASL GSSAPI mechanism (RFC 4752).
//!
//! The exchange has two phases. First, server challenges are fed through a
//! GSSAPI security context until the context reports that the handshake is
//! complete. Then the server sends one more token, protected by the context,
//! which advertises the security layers it supports and its maximum buffer
//! size. The client answers with a protected token selecting no security
//! layer, after which the server reports the outcome of `AUTHENTICATE`.
//!
//! The security context itself is supplied by a `ContextProvider`. The real
//! one is `Kerberos`, which drives the system GSSAPI library.

use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};
use thiserror::Error;

mod ffi;
mod kerberos;

pub use kerberos::{Kerberos, KerberosContext};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{what} failed: {message}")]
    Gss {
        what: &'static str,
        major: u32,
        minor: u32,
        message: String,
    },
    #[error("Unable to load GSSAPI library: {0}")]
    Library(String),
    #[error("Security context not established")]
    NotEstablished,
}

/// What the GSSAPI context reported after consuming a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// More tokens must be exchanged.
    Continue,
    /// The handshake is finished; the context can wrap and unwrap.
    Complete,
}

/// A GSSAPI security context for one authentication.
pub trait SecurityContext {
    /// Consume `token` (empty on the very first call) and produce the next
    /// token for the server, which may be empty.
    fn step(&mut self, token: &[u8]) -> Result<(StepStatus, Vec<u8>), Error>;
    fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error>;
    fn unwrap(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
    /// The name of the authenticated client principal.
    fn user_name(&self) -> Result<String, Error>;
}

/// Creates security contexts bound to a service principal.
pub trait ContextProvider {
    type Context: SecurityContext;

    fn init_context(
        &self,
        service_principal: &str,
    ) -> Result<Self::Context, Error>;
}

/// The client's answer to one server challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Send this token (possibly empty) to the server.
    Token(Vec<u8>),
    /// Send nothing and cancel the exchange.
    Abort,
}

/// A SASL mechanism driven one challenge at a time by the IMAP client.
pub trait Authenticator {
    /// The SASL mechanism name passed to `AUTHENTICATE`.
    fn mechanism(&self) -> &str;

    /// Answer the decoded server challenge `challenge`.
    fn step(&mut self, challenge: &[u8]) -> Result<Response, Error>;
}

bitflags::bitflags! {
    /// The security layers the server offers in the first byte of its final
    /// challenge.
    pub struct SecurityLayers: u8 {
        const NONE = 1;
        const INTEGRITY = 2;
        const CONFIDENTIALITY = 4;
    }
}

/// Sent after the layer selection and buffer size in our final token. The
/// server treats it as the authorisation identity.
const CLIENT_TAG: &[u8] = b"ofo";

/// The state of one GSSAPI SASL exchange.
///
/// The context is created lazily on the first challenge and lives as long as
/// the session, so that `wrap`, `unwrap` and `client_name` remain usable after
/// authentication succeeds.
pub struct Session<P: ContextProvider> {
    provider: P,
    service_principal: String,
    context: Option<P::Context>,
    complete: bool,
}

impl<P: ContextProvider> Session<P> {
    /// Prepare to authenticate to `service` (usually `imap`) on `hostname`.
    pub fn new(provider: P, service: &str, hostname: &str) -> Self {
        Session {
            provider,
            service_principal: format!("{}@{}", service, hostname),
            context: None,
            complete: false,
        }
    }

    pub fn service_principal(&self) -> &str {
        &self.service_principal
    }

    /// Whether the security context handshake has finished.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Process one server token and determine what to send back.
    pub fn step(&mut self, received: &[u8]) -> Result<Response, Error> {
        if self.complete {
            return self.negotiate_layer(received);
        }

        if self.context.is_none() {
            debug!(
                "Creating GSSAPI context for {}",
                self.service_principal
            );
            let context =
                self.provider.init_context(&self.service_principal)?;
            self.context = Some(context);
        }

        let context = match self.context.as_mut() {
            Some(context) => context,
            None => return Err(Error::NotEstablished),
        };

        let (status, token) = context.step(received)?;
        debug!(
            "GSSAPI step: {:?}, {} bytes in, {} bytes out",
            status,
            received.len(),
            token.len()
        );
        if StepStatus::Complete == status {
            self.complete = true;
        }

        Ok(Response::Token(token))
    }

    fn negotiate_layer(&mut self, received: &[u8]) -> Result<Response, Error> {
        let token = self.unwrap(received)?;
        if 4 != token.len() {
            warn!(
                "Security layer token is {} bytes instead of 4",
                token.len()
            );
            return Ok(Response::Abort);
        }

        // Neither value is enforced since we never select a security layer.
        let layers = SecurityLayers::from_bits_truncate(token[0]);
        let max_buffer = BigEndian::read_u24(&token[1..]);
        debug!(
            "Server offers security layers {:?}, max buffer {}",
            layers, max_buffer
        );

        let mut reply = vec![0u8; 4];
        reply.extend_from_slice(CLIENT_TAG);
        self.wrap(&reply).map(Response::Token)
    }

    /// Protect `plaintext` with the established context.
    pub fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.established()?.wrap(plaintext)
    }

    /// Verify and decode `ciphertext` with the established context.
    pub fn unwrap(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        self.established()?.unwrap(ciphertext)
    }

    /// The authenticated principal name, available once a context exists.
    pub fn client_name(&self) -> Result<String, Error> {
        match self.context {
            Some(ref context) => context.user_name(),
            None => Err(Error::NotEstablished),
        }
    }

    fn established(&mut self) -> Result<&mut P::Context, Error> {
        match self.context {
            Some(ref mut context) if self.complete => Ok(context),
            _ => Err(Error::NotEstablished),
        }
    }
}

impl<P: ContextProvider> Authenticator for Session<P> {
    fn mechanism(&self) -> &str {
        "GSSAPI"
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Response, Error> {
        Session::step(self, challenge)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// A provider whose contexts finish after a fixed number of steps and
    /// "protect" data by prefixing it with `W` and flipping its bits.
    pub struct MockProvider {
        pub rounds: usize,
        pub fail_init: bool,
    }

    pub struct MockContext {
        principal: String,
        steps: usize,
        rounds: usize,
    }

    pub fn mock_wrap(data: &[u8]) -> Vec<u8> {
        let mut out = vec![b'W'];
        out.extend(data.iter().map(|b| !b));
        out
    }

    pub fn mock_unwrap(data: &[u8]) -> Option<Vec<u8>> {
        if data.first() != Some(&b'W') {
            return None;
        }

        Some(data[1..].iter().map(|b| !b).collect())
    }

    impl ContextProvider for MockProvider {
        type Context = MockContext;

        fn init_context(
            &self,
            service_principal: &str,
        ) -> Result<MockContext, Error> {
            if self.fail_init {
                return Err(Error::Gss {
                    what: "gss_import_name",
                    major: 0x0001_0000,
                    minor: 0,
                    message: "bad name".to_owned(),
                });
            }

            Ok(MockContext {
                principal: service_principal.to_owned(),
                steps: 0,
                rounds: self.rounds,
            })
        }
    }

    impl SecurityContext for MockContext {
        fn step(
            &mut self,
            _token: &[u8],
        ) -> Result<(StepStatus, Vec<u8>), Error> {
            self.steps += 1;
            if self.steps >= self.rounds {
                Ok((StepStatus::Complete, Vec::new()))
            } else {
                Ok((
                    StepStatus::Continue,
                    format!("{}:{}", self.principal, self.steps).into_bytes(),
                ))
            }
        }

        fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
            Ok(mock_wrap(plaintext))
        }

        fn unwrap(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
            mock_unwrap(ciphertext).ok_or_else(|| Error::Gss {
                what: "gss_unwrap",
                major: 0x0006_0000,
                minor: 0,
                message: "defective token".to_owned(),
            })
        }

        fn user_name(&self) -> Result<String, Error> {
            Ok("jdoe@EXAMPLE.ORG".to_owned())
        }
    }

    fn session(rounds: usize) -> Session<MockProvider> {
        Session::new(
            MockProvider {
                rounds,
                fail_init: false,
            },
            "imap",
            "mail.example.org",
        )
    }

    #[test]
    fn first_step_creates_context() {
        let mut s = session(2);
        assert_eq!("imap@mail.example.org", s.service_principal());
        assert_matches!(Err(Error::NotEstablished), s.client_name());

        assert_eq!(
            Response::Token(b"imap@mail.example.org:1".to_vec()),
            s.step(b"").unwrap()
        );
        assert!(!s.is_complete());
        assert_eq!("jdoe@EXAMPLE.ORG", s.client_name().unwrap());
    }

    #[test]
    fn completion_takes_effect_on_next_call() {
        let mut s = session(2);
        s.step(b"").unwrap();
        assert_eq!(Response::Token(vec![]), s.step(b"server").unwrap());
        assert!(s.is_complete());

        let reply = s.step(&mock_wrap(&[7, 0, 0x10, 0])).unwrap();
        let reply = match reply {
            Response::Token(reply) => reply,
            Response::Abort => panic!("unexpected abort"),
        };
        let plain = mock_unwrap(&reply).unwrap();
        assert_eq!(7, plain.len());
        assert_eq!(b"\0\0\0\0ofo", &plain[..]);
    }

    #[test]
    fn bad_layer_token_length_aborts() {
        let mut s = session(1);
        s.step(b"").unwrap();
        assert!(s.is_complete());
        assert_eq!(Response::Abort, s.step(&mock_wrap(&[1, 2, 3])).unwrap());

        let mut s = session(1);
        s.step(b"").unwrap();
        assert_eq!(
            Response::Abort,
            s.step(&mock_wrap(&[1, 0, 0, 0, 0])).unwrap()
        );
    }

    #[test]
    fn undecodable_layer_token_is_an_error() {
        let mut s = session(1);
        s.step(b"").unwrap();
        assert_matches!(
            Err(Error::Gss {
                what: "gss_unwrap",
                ..
            }),
            s.step(b"garbage")
        );
    }

    #[test]
    fn wrap_requires_complete_context() {
        let mut s = session(3);
        assert_matches!(Err(Error::NotEstablished), s.wrap(b"x"));
        s.step(b"").unwrap();
        assert_matches!(Err(Error::NotEstablished), s.unwrap(b"Wx"));
        s.step(b"").unwrap();
        s.step(b"").unwrap();
        assert_eq!(mock_wrap(b"x"), s.wrap(b"x").unwrap());
    }

    #[test]
    fn init_failure_propagates() {
        let mut s = Session::new(
            MockProvider {
                rounds: 1,
                fail_init: true,
            },
            "imap",
            "mail.example.org",
        );
        assert_matches!(Err(Error::Gss { .. }), s.step(b""));
        assert!(!s.is_complete());
    }
}
