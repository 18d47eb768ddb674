// =============================================================================
// Static Screener — syntactic pre-filter over generated rule code
// =============================================================================
//
// Rejects rule bodies containing forbidden substrings before they ever reach
// a sandbox: OS access, process spawning, file I/O, dynamic imports, and
// standard-stream mutation. This is a coarse pre-filter, not a security
// guarantee; the sandbox remains the real boundary. Its job is to fail
// cheaply without paying for sandbox provisioning on obviously unsafe drafts.
// =============================================================================

use tracing::debug;

/// Denylist of substrings, matched case-insensitively against the rule body.
const FORBIDDEN_PATTERNS: &[&str] = &[
    "import os",
    "import subprocess",
    "from subprocess",
    "import shutil",
    "import socket",
    "open(",
    "exec(",
    "eval(",
    "__import__",
    "os.system",
    "os.popen",
    "sys.stdout",
    "sys.stderr",
];

/// Screen a rule body. Returns `None` if the code is clean, or
/// `Some(pattern)` naming the first forbidden pattern found.
pub fn screen(code: &str) -> Option<&'static str> {
    let lowered = code.to_lowercase();

    for pattern in FORBIDDEN_PATTERNS {
        if lowered.contains(pattern) {
            debug!(pattern, "static screener rejected rule code");
            return Some(pattern);
        }
    }

    None
}
