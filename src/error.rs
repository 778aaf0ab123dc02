/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2025 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

// Hello developer. Please add your error to the according subsection
// that is commented, or make a new subsection. Keep it clean.

/// Main result type used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// General library errors used throughout the codebase.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // ==============
    // Parsing errors
    // ==============
    #[error("Parse failed: {0}")]
    ParseFailed(&'static str),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error("Failed converting b58 string to PeerId")]
    PeerIdFromStr,

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Malformed seed list: {0}")]
    SeedParse(String),

    #[error("Malformed access list: {0}")]
    AccessListParse(String),

    // ===============
    // Encoding errors
    // ===============
    #[error("decode failed: {0}")]
    DecodeError(String),

    // ============
    // Route errors
    // ============
    #[error("Route has no destination peer id")]
    RouteDestinationMissing,

    #[error("Route hop #{0} has no peer id")]
    IncompleteHop(usize),

    #[error("Route contains a loop")]
    RouteHasLoop,

    // ======================
    // Network-related errors
    // ======================
    #[error("Unsupported seed location scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Connection failed")]
    ConnectFailed,

    #[error("Connection timed out")]
    ConnectTimeout,

    #[error("HTTP response parse failed")]
    HttpParse,

    #[error("HTTP request failed with status {0}")]
    HttpStatus(u16),

    #[error("Document larger than {0} bytes")]
    DocumentTooLarge(u64),

    #[error("Seed discovery failed: {0}")]
    DiscoveryFailed(String),

    // =================
    // Dispatcher errors
    // =================
    #[error("Unknown dispatcher account")]
    UnknownAccount,

    #[error("Dispatcher account is closed")]
    AccountClosed,

    // ====================
    // Miscellaneous errors
    // ====================
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl From<tinyjson::JsonParseError> for Error {
    fn from(err: tinyjson::JsonParseError) -> Self {
        Self::JsonParseError(err.to_string())
    }
}
