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

//! `ContextProvider` backed by the system Kerberos GSSAPI library.

use std::os::raw::c_void;
use std::path::Path;
use std::ptr;
use std::rc::Rc;

use libloading::Library;
use log::{debug, info};

use super::ffi::{self, gss_buffer_desc, OM_uint32};
use super::{ContextProvider, Error, SecurityContext, StepStatus};

/// Libraries tried in order when none is configured.
const DEFAULT_LIBRARIES: &[&str] = &[
    "libgssapi_krb5.so.2",
    "libgssapi_krb5.so",
    "libgssapi.so.3",
    "libgssapi.so",
];

struct Gss {
    import_name: ffi::gss_import_name,
    init_sec_context: ffi::gss_init_sec_context,
    wrap: ffi::gss_wrap,
    unwrap: ffi::gss_unwrap,
    inquire_context: ffi::gss_inquire_context,
    display_name: ffi::gss_display_name,
    display_status: ffi::gss_display_status,
    release_buffer: ffi::gss_release_buffer,
    release_name: ffi::gss_release_name,
    delete_sec_context: ffi::gss_delete_sec_context,
    // Must outlive every function pointer above.
    _library: Library,
}

macro_rules! resolve {
    ($lib:expr, $func:ident) => {{
        let symbol: libloading::Symbol<ffi::$func> =
            unsafe { $lib.get(stringify!($func).as_bytes()) }.map_err(
                |e| Error::Library(format!("{}: {}", stringify!($func), e)),
            )?;
        *symbol
    }};
}

fn oid(elements: &'static [u8]) -> ffi::gss_OID_desc {
    ffi::gss_OID_desc {
        length: elements.len() as OM_uint32,
        elements: elements.as_ptr() as *mut c_void,
    }
}

impl Gss {
    fn open(path: &str) -> Result<Self, Error> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| Error::Library(format!("{}: {}", path, e)))?;

        Ok(Gss {
            import_name: resolve!(library, gss_import_name),
            init_sec_context: resolve!(library, gss_init_sec_context),
            wrap: resolve!(library, gss_wrap),
            unwrap: resolve!(library, gss_unwrap),
            inquire_context: resolve!(library, gss_inquire_context),
            display_name: resolve!(library, gss_display_name),
            display_status: resolve!(library, gss_display_status),
            release_buffer: resolve!(library, gss_release_buffer),
            release_name: resolve!(library, gss_release_name),
            delete_sec_context: resolve!(library, gss_delete_sec_context),
            _library: library,
        })
    }

    /// Copy the contents of a buffer allocated by the library and free it.
    fn take_buffer(&self, buffer: &mut gss_buffer_desc) -> Vec<u8> {
        if buffer.value.is_null() {
            return Vec::new();
        }

        let data = unsafe {
            std::slice::from_raw_parts(
                buffer.value as *const u8,
                buffer.length,
            )
        }
        .to_vec();
        let mut minor = 0;
        unsafe {
            (self.release_buffer)(&mut minor, buffer);
        }
        data
    }

    fn status_text(&self, status: OM_uint32, kind: i32) -> Vec<String> {
        let mut messages = Vec::new();
        let mut message_context: OM_uint32 = 0;
        loop {
            let mut minor = 0;
            let mut text = gss_buffer_desc::empty();
            let major = unsafe {
                (self.display_status)(
                    &mut minor,
                    status,
                    kind,
                    ptr::null_mut(),
                    &mut message_context,
                    &mut text,
                )
            };
            let text = self.take_buffer(&mut text);
            if 0 != major & ffi::GSS_ERROR_MASK {
                break;
            }

            if !text.is_empty() {
                messages.push(String::from_utf8_lossy(&text).into_owned());
            }

            if 0 == message_context {
                break;
            }
        }
        messages
    }

    fn check(
        &self,
        what: &'static str,
        major: OM_uint32,
        minor: OM_uint32,
    ) -> Result<(), Error> {
        if 0 == major & ffi::GSS_ERROR_MASK {
            return Ok(());
        }

        let mut messages = self.status_text(major, ffi::GSS_C_GSS_CODE);
        if 0 != minor {
            messages.extend(self.status_text(minor, ffi::GSS_C_MECH_CODE));
        }
        if messages.is_empty() {
            messages.push(format!("major status {:#x}", major));
        }

        Err(Error::Gss {
            what,
            major,
            minor,
            message: messages.join("; "),
        })
    }
}

/// Creates Kerberos security contexts from the user's credential cache.
#[derive(Clone)]
pub struct Kerberos {
    gss: Rc<Gss>,
}

impl Kerberos {
    /// Load the GSSAPI library at `library`, or the first of the usual
    /// library names that can be loaded.
    pub fn load(library: Option<&Path>) -> Result<Self, Error> {
        if let Some(library) = library {
            let path = library.to_string_lossy();
            return Gss::open(&path).map(|gss| Kerberos { gss: Rc::new(gss) });
        }

        let mut errors = Vec::new();
        for &candidate in DEFAULT_LIBRARIES {
            match Gss::open(candidate) {
                Ok(gss) => {
                    info!("Loaded GSSAPI from {}", candidate);
                    return Ok(Kerberos { gss: Rc::new(gss) });
                }
                Err(Error::Library(e)) => {
                    debug!("Not using {}", e);
                    errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Library(errors.join("; ")))
    }
}

impl ContextProvider for Kerberos {
    type Context = KerberosContext;

    fn init_context(
        &self,
        service_principal: &str,
    ) -> Result<KerberosContext, Error> {
        let mut minor = 0;
        let mut name = gss_buffer_desc::borrowed(service_principal.as_bytes());
        let mut name_type = oid(ffi::NT_HOSTBASED_SERVICE);
        let mut target: ffi::gss_name_t = ptr::null_mut();
        let major = unsafe {
            (self.gss.import_name)(
                &mut minor,
                &mut name,
                &mut name_type,
                &mut target,
            )
        };
        self.gss.check("gss_import_name", major, minor)?;

        Ok(KerberosContext {
            gss: Rc::clone(&self.gss),
            target,
            handle: ptr::null_mut(),
        })
    }
}

/// A Kerberos GSSAPI context initiated towards one service principal.
pub struct KerberosContext {
    gss: Rc<Gss>,
    target: ffi::gss_name_t,
    handle: ffi::gss_ctx_id_t,
}

impl SecurityContext for KerberosContext {
    fn step(&mut self, token: &[u8]) -> Result<(StepStatus, Vec<u8>), Error> {
        let mut minor = 0;
        let mut input = gss_buffer_desc::borrowed(token);
        let input: ffi::gss_buffer_t = if token.is_empty() {
            ptr::null_mut()
        } else {
            &mut input
        };
        let mut mech = oid(ffi::MECH_KRB5);
        let mut output = gss_buffer_desc::empty();

        let major = unsafe {
            (self.gss.init_sec_context)(
                &mut minor,
                ptr::null_mut(),
                &mut self.handle,
                self.target,
                &mut mech,
                ffi::GSS_C_MUTUAL_FLAG | ffi::GSS_C_SEQUENCE_FLAG,
                0,
                ptr::null_mut(),
                input,
                ptr::null_mut(),
                &mut output,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        let output = self.gss.take_buffer(&mut output);
        self.gss.check("gss_init_sec_context", major, minor)?;

        let status = if 0 != major & ffi::GSS_S_CONTINUE_NEEDED {
            StepStatus::Continue
        } else {
            StepStatus::Complete
        };
        Ok((status, output))
    }

    fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut minor = 0;
        let mut input = gss_buffer_desc::borrowed(plaintext);
        let mut output = gss_buffer_desc::empty();
        let major = unsafe {
            (self.gss.wrap)(
                &mut minor,
                self.handle,
                0,
                ffi::GSS_C_QOP_DEFAULT,
                &mut input,
                ptr::null_mut(),
                &mut output,
            )
        };
        let output = self.gss.take_buffer(&mut output);
        self.gss.check("gss_wrap", major, minor)?;
        Ok(output)
    }

    fn unwrap(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut minor = 0;
        let mut input = gss_buffer_desc::borrowed(ciphertext);
        let mut output = gss_buffer_desc::empty();
        let major = unsafe {
            (self.gss.unwrap)(
                &mut minor,
                self.handle,
                &mut input,
                &mut output,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        let output = self.gss.take_buffer(&mut output);
        self.gss.check("gss_unwrap", major, minor)?;
        Ok(output)
    }

    fn user_name(&self) -> Result<String, Error> {
        if self.handle.is_null() {
            return Err(Error::NotEstablished);
        }

        let mut minor = 0;
        let mut source: ffi::gss_name_t = ptr::null_mut();
        let major = unsafe {
            (self.gss.inquire_context)(
                &mut minor,
                self.handle,
                &mut source,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        self.gss.check("gss_inquire_context", major, minor)?;

        let mut text = gss_buffer_desc::empty();
        let major = unsafe {
            (self.gss.display_name)(
                &mut minor,
                source,
                &mut text,
                ptr::null_mut(),
            )
        };
        let text = self.gss.take_buffer(&mut text);
        let mut release_minor = 0;
        unsafe {
            (self.gss.release_name)(&mut release_minor, &mut source);
        }
        self.gss.check("gss_display_name", major, minor)?;

        Ok(String::from_utf8_lossy(&text).into_owned())
    }
}

impl Drop for KerberosContext {
    fn drop(&mut self) {
        let mut minor = 0;
        unsafe {
            if !self.handle.is_null() {
                (self.gss.delete_sec_context)(
                    &mut minor,
                    &mut self.handle,
                    ptr::null_mut(),
                );
            }
            if !self.target.is_null() {
                (self.gss.release_name)(&mut minor, &mut self.target);
            }
        }
    }
}
