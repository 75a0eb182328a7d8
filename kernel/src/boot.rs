// =============================================================================
// Pintle: Limine Boot Protocol Interface
// =============================================================================
//
// The kernel declares what it needs from the bootloader as static request
// structures; Limine finds them by their magic bytes in `.limine_requests`
// and fills in the response pointers before jumping to `kmain`.
//
// We only need two things: confirmation that the protocol revision is
// supported, and the kernel command line (which selects the scheduler
// policy with `-o mlfqs`).
//
// =============================================================================

use limine::BaseRevision;
use limine::request::{ExecutableCmdlineRequest, RequestsEndMarker, RequestsStartMarker};

#[used]
#[unsafe(link_section = ".limine_requests_start")]
static REQUESTS_START: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static CMDLINE_REQUEST: ExecutableCmdlineRequest = ExecutableCmdlineRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests_end")]
static REQUESTS_END: RequestsEndMarker = RequestsEndMarker::new();

/// Whether the bootloader speaks the protocol revision we were built for.
pub fn is_supported() -> bool {
    BASE_REVISION.is_supported()
}

/// The command line the kernel was booted with, empty if none was given
/// or it is not valid UTF-8.
pub fn cmdline() -> &'static str {
    CMDLINE_REQUEST
        .get_response()
        .and_then(|response| response.cmdline().to_str().ok())
        .unwrap_or("")
}
