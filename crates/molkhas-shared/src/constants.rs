/// Messages fetched per page when backfilling a conversation.
pub const MESSAGE_PAGE_SIZE: u32 = 50;

/// Maximum notifications held client-side (newest-first window).
/// The unread count is derived from this window, not a global count.
pub const NOTIFICATION_WINDOW: u32 = 50;

/// Cap on the unread badge shown by UI layers.
pub const UNREAD_BADGE_MAX: u32 = 9;

/// How long a resolved privilege flag stays cached per user (50 minutes).
pub const PRIVILEGE_CACHE_TTL_SECS: u64 = 50 * 60;

/// Timeout for the background privilege lookup. On expiry the user is
/// treated as non-privileged; identity resolution is never blocked.
pub const PRIVILEGE_CHECK_TIMEOUT_SECS: u64 = 5;

/// Fallback display name when no profile name, provider name, or email
/// is available.
pub const DEFAULT_DISPLAY_NAME: &str = "user";

/// How many ranked context snippets are handed to the generation
/// collaborator per assistant query.
pub const ASSIST_CONTEXT_SNIPPETS: usize = 8;
