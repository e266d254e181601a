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

//! The parts of the GSSAPI C binding (RFC 2744) used for SASL
//! authentication. The functions are resolved at run time.

#![allow(non_camel_case_types, dead_code)]

use std::os::raw::{c_int, c_void};

pub type OM_uint32 = u32;
pub type gss_qop_t = OM_uint32;

#[repr(C)]
pub struct gss_buffer_desc {
    pub length: usize,
    pub value: *mut c_void,
}
pub type gss_buffer_t = *mut gss_buffer_desc;

impl gss_buffer_desc {
    pub fn empty() -> Self {
        gss_buffer_desc {
            length: 0,
            value: std::ptr::null_mut(),
        }
    }

    /// Borrow `data` as an input buffer. The C functions never write
    /// through input buffers.
    pub fn borrowed(data: &[u8]) -> Self {
        gss_buffer_desc {
            length: data.len(),
            value: data.as_ptr() as *mut c_void,
        }
    }
}

#[repr(C)]
pub struct gss_OID_desc {
    pub length: OM_uint32,
    pub elements: *mut c_void,
}
pub type gss_OID = *mut gss_OID_desc;

pub enum gss_name_struct {}
pub type gss_name_t = *mut gss_name_struct;
pub enum gss_ctx_id_struct {}
pub type gss_ctx_id_t = *mut gss_ctx_id_struct;
pub enum gss_cred_id_struct {}
pub type gss_cred_id_t = *mut gss_cred_id_struct;
pub enum gss_channel_bindings_struct {}
pub type gss_channel_bindings_t = *mut gss_channel_bindings_struct;

pub const GSS_S_COMPLETE: OM_uint32 = 0;
pub const GSS_S_CONTINUE_NEEDED: OM_uint32 = 1;
/// Calling and routine error bits of a major status.
pub const GSS_ERROR_MASK: OM_uint32 = 0xffff_0000;

pub const GSS_C_MUTUAL_FLAG: OM_uint32 = 2;
pub const GSS_C_SEQUENCE_FLAG: OM_uint32 = 8;

pub const GSS_C_GSS_CODE: c_int = 1;
pub const GSS_C_MECH_CODE: c_int = 2;

pub const GSS_C_INDEFINITE: OM_uint32 = 0xffff_ffff;
pub const GSS_C_QOP_DEFAULT: gss_qop_t = 0;

/// 1.2.840.113554.1.2.1.4
pub const NT_HOSTBASED_SERVICE: &[u8] =
    b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x01\x04";
/// 1.2.840.113554.1.2.2
pub const MECH_KRB5: &[u8] = b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x02";

pub type gss_import_name = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    input_name_buffer: gss_buffer_t,
    input_name_type: gss_OID,
    output_name: *mut gss_name_t,
) -> OM_uint32;

pub type gss_init_sec_context = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    initiator_cred_handle: gss_cred_id_t,
    context_handle: *mut gss_ctx_id_t,
    target_name: gss_name_t,
    mech_type: gss_OID,
    req_flags: OM_uint32,
    time_req: OM_uint32,
    input_chan_bindings: gss_channel_bindings_t,
    input_token: gss_buffer_t,
    actual_mech_type: *mut gss_OID,
    output_token: gss_buffer_t,
    ret_flags: *mut OM_uint32,
    time_rec: *mut OM_uint32,
) -> OM_uint32;

pub type gss_wrap = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    context_handle: gss_ctx_id_t,
    conf_req_flag: c_int,
    qop_req: gss_qop_t,
    input_message_buffer: gss_buffer_t,
    conf_state: *mut c_int,
    output_message_buffer: gss_buffer_t,
) -> OM_uint32;

pub type gss_unwrap = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    context_handle: gss_ctx_id_t,
    input_message_buffer: gss_buffer_t,
    output_message_buffer: gss_buffer_t,
    conf_state: *mut c_int,
    qop_state: *mut gss_qop_t,
) -> OM_uint32;

pub type gss_inquire_context = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    context_handle: gss_ctx_id_t,
    src_name: *mut gss_name_t,
    targ_name: *mut gss_name_t,
    lifetime_rec: *mut OM_uint32,
    mech_type: *mut gss_OID,
    ctx_flags: *mut OM_uint32,
    locally_initiated: *mut c_int,
    open: *mut c_int,
) -> OM_uint32;

pub type gss_display_name = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    input_name: gss_name_t,
    output_name_buffer: gss_buffer_t,
    output_name_type: *mut gss_OID,
) -> OM_uint32;

pub type gss_display_status = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    status_value: OM_uint32,
    status_type: c_int,
    mech_type: gss_OID,
    message_context: *mut OM_uint32,
    status_string: gss_buffer_t,
) -> OM_uint32;

pub type gss_release_buffer = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    buffer: gss_buffer_t,
) -> OM_uint32;

pub type gss_release_name = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    name: *mut gss_name_t,
) -> OM_uint32;

pub type gss_delete_sec_context = unsafe extern "C" fn(
    minor_status: *mut OM_uint32,
    context_handle: *mut gss_ctx_id_t,
    output_token: gss_buffer_t,
) -> OM_uint32;
