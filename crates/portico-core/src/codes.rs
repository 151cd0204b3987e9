//! Response codes and canonical reason prefixes.
//!
//! Both ends of a conversation build responses from these constants, so the
//! front end can map a code to a user-visible outcome without parsing free
//! text. Reasons are prefixes — handlers append detail after them.

pub const CODE_200_OK: u16 = 200;
pub const REASON_200_OK: &str = "OK. ";

pub const CODE_201_CREATED: u16 = 201;
pub const REASON_201_CREATED: &str = "Created. ";

pub const CODE_202_ACCEPTED: u16 = 202;
pub const REASON_202_ACCEPTED: &str = "Accepted. ";

pub const CODE_400_BAD_REQUEST: u16 = 400;
pub const REASON_400_BAD_REQUEST: &str = "Bad request. ";

pub const CODE_401_UNAUTHORIZED: u16 = 401;
pub const REASON_401_UNAUTHORIZED: &str = "Unauthorized. ";

pub const CODE_404_NOT_FOUND: u16 = 404;
pub const REASON_404_NOT_FOUND: &str = "Not found. ";

pub const CODE_408_REQUEST_TIMEOUT: u16 = 408;
pub const REASON_408_REQUEST_TIMEOUT: &str = "Request timeout. ";

pub const CODE_503_SERVICE_UNAVAILABLE: u16 = 503;
pub const REASON_503_SERVICE_UNAVAILABLE: &str = "Service unavailable. ";

/// Content type for JSON response bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";
