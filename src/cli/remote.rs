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

use std::cell::RefCell;
use std::io::{self, BufRead, Read, Write};
use std::net::{self, ToSocketAddrs};
use std::rc::Rc;

use log::info;
use openssl::ssl::{
    HandshakeError, SslConnector, SslMethod, SslStream, SslVerifyMode,
};

use crate::imap::{Client, Status};
use crate::sasl::{ContextProvider, Session};
use crate::support::config::ServerConfig;
use crate::support::error::Error;

pub(super) type RemoteClient =
    Client<io::BufReader<SharedStream>, SharedStream>;

/// The connection to the server, with or without TLS.
#[derive(Debug)]
pub(super) enum Stream {
    Plain(net::TcpStream),
    Tls(SslStream<net::TcpStream>),
}

impl Read for Stream {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match *self {
            Stream::Plain(ref mut s) => s.read(dst),
            Stream::Tls(ref mut s) => s.read(dst),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        match *self {
            Stream::Plain(ref mut s) => s.write(src),
            Stream::Tls(ref mut s) => s.write(src),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Stream::Plain(ref mut s) => s.flush(),
            Stream::Tls(ref mut s) => s.flush(),
        }
    }
}

/// One `Stream` shared between the buffered reader and the writer of a
/// client.
#[derive(Clone, Debug)]
pub(super) struct SharedStream(Rc<RefCell<Stream>>);

impl Read for SharedStream {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.0.borrow_mut().read(dst)
    }
}

impl Write for SharedStream {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(src)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

/// Open a connection to `host` and wrap it in a client.
///
/// Nothing is read from the server yet.
pub(super) fn connect(
    server: &ServerConfig,
    host: &str,
    trace: bool,
) -> Result<RemoteClient, Error> {
    let port = server.port();
    let address = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "Host not found")
    })?;

    info!("Opening connection to {}:{} ({})", host, port, address);
    let tcp_stream = net::TcpStream::connect(address)?;

    let stream = if server.tls {
        info!("Starting TLS handshake");
        let mut connector = SslConnector::builder(SslMethod::tls())?;
        if server.allow_insecure_tls_connections {
            connector.set_verify(SslVerifyMode::NONE);
        }

        let ssl_stream = connector
            .build()
            .connect(host, tcp_stream)
            .map_err(|e| match e {
                HandshakeError::SetupFailure(es) => Error::Ssl(es),
                HandshakeError::Failure(f) => {
                    Error::Handshake(f.into_error().to_string())
                }
                HandshakeError::WouldBlock(_) => {
                    Error::Handshake("handshake interrupted".to_owned())
                }
            })?;
        Stream::Tls(ssl_stream)
    } else {
        Stream::Plain(tcp_stream)
    };

    let write = SharedStream(Rc::new(RefCell::new(stream)));
    let read = io::BufReader::new(write.clone());
    Ok(Client::new(read, write, if trace { Some("") } else { None }))
}

/// Read the greeting and authenticate through `session`.
///
/// Returns the authenticated principal, or `None` if the server
/// pre-authenticated the connection.
pub(super) fn log_in<R: BufRead, W: Write, P: ContextProvider>(
    client: &mut Client<R, W>,
    session: &mut Session<P>,
) -> Result<Option<String>, Error> {
    let greeting = client.greeting()?;
    if Status::Preauth == greeting.status {
        info!("Connection is already authenticated");
        return Ok(None);
    }

    info!("Authenticating as client of {}", session.service_principal());
    client
        .authenticate(session)?
        .into_result("AUTHENTICATE")?;
    Ok(Some(session.client_name()?))
}
