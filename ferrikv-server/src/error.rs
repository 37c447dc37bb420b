//! Wire-level error replies (spec §7), collected here so every handler
//! spells the exact same message for the exact same failure. Follows the
//! teacher's `NetworkError { Wait, Fatal(ErrorType) }` shape at the crate
//! boundaries (`ferrikv-proto`, `ferrikv-persist`); at the command-handler
//! level, a client-facing error is just a pre-formatted `Reply::Error` --
//! there is nothing to propagate past the one call site that produces it.

use ferrikv_proto::Reply;

pub fn wrong_number_of_arguments() -> Reply {
    Reply::error("ERR wrong number of arguments")
}

pub fn syntax_error() -> Reply {
    Reply::error("ERR syntax error")
}

pub fn wrong_type() -> Reply {
    Reply::error("ERR Operation against a key holding the wrong kind of value")
}

pub fn no_such_key() -> Reply {
    Reply::error("ERR no such key")
}

pub fn index_out_of_range() -> Reply {
    Reply::error("ERR index out of range")
}

pub fn deny_oom() -> Reply {
    Reply::error("ERR command not allowed when used memory > 'maxmemory'")
}

pub fn not_authenticated() -> Reply {
    Reply::error("ERR operation not permitted")
}

pub fn sync_with_pending_input() -> Reply {
    Reply::error("ERR SYNC is invalid with pending input")
}

pub fn save_in_progress() -> Reply {
    Reply::error("ERR background save in progress")
}

pub fn not_a_valid_float() -> Reply {
    Reply::error("ERR value is not a valid float")
}

pub fn not_an_integer() -> Reply {
    Reply::error("ERR value is not an integer or out of range")
}

pub fn unknown_command(name: &[u8]) -> Reply {
    Reply::error(format!("ERR unknown command '{}'", String::from_utf8_lossy(name)))
}
