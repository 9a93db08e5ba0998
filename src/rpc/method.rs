use std::fmt;
use std::str::FromStr;

use crate::errors::KeeperError;

/// How a method exchanges messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    /// The client sends a stream of upload messages, then gets one reply.
    ClientStreaming,
    /// The server sends a stream of chunks before the final reply.
    ServerStreaming,
}

/// Every method the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    RegisterUser,
    Authorize,
    Echo,
    AddCredential,
    GetCredential,
    GetCredentials,
    RemoveCredential,
    AddBankCard,
    GetBankCard,
    GetBankCards,
    RemoveBankCard,
    AddNote,
    GetNote,
    GetNotes,
    RemoveNote,
    GetFiles,
    RemoveFile,
    Upload,
    Download,
}

impl Method {
    pub const ALL: [Method; 19] = [
        Method::RegisterUser,
        Method::Authorize,
        Method::Echo,
        Method::AddCredential,
        Method::GetCredential,
        Method::GetCredentials,
        Method::RemoveCredential,
        Method::AddBankCard,
        Method::GetBankCard,
        Method::GetBankCards,
        Method::RemoveBankCard,
        Method::AddNote,
        Method::GetNote,
        Method::GetNotes,
        Method::RemoveNote,
        Method::GetFiles,
        Method::RemoveFile,
        Method::Upload,
        Method::Download,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::RegisterUser => "RegisterUser",
            Method::Authorize => "Authorize",
            Method::Echo => "Echo",
            Method::AddCredential => "AddCredential",
            Method::GetCredential => "GetCredential",
            Method::GetCredentials => "GetCredentials",
            Method::RemoveCredential => "RemoveCredential",
            Method::AddBankCard => "AddBankCard",
            Method::GetBankCard => "GetBankCard",
            Method::GetBankCards => "GetBankCards",
            Method::RemoveBankCard => "RemoveBankCard",
            Method::AddNote => "AddNote",
            Method::GetNote => "GetNote",
            Method::GetNotes => "GetNotes",
            Method::RemoveNote => "RemoveNote",
            Method::GetFiles => "GetFiles",
            Method::RemoveFile => "RemoveFile",
            Method::Upload => "Upload",
            Method::Download => "Download",
        }
    }

    /// Methods reachable without a session token.
    pub fn bypasses_auth(self) -> bool {
        matches!(self, Method::RegisterUser | Method::Authorize | Method::Echo)
    }

    pub fn kind(self) -> CallKind {
        match self {
            Method::Upload => CallKind::ClientStreaming,
            Method::Download => CallKind::ServerStreaming,
            _ => CallKind::Unary,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| KeeperError::Unimplemented(s.to_string()))
    }
}
