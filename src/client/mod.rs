//! Client for the SecretKeeper wire protocol.
//!
//! One [`KeeperClient`] owns one TCP connection and issues calls on it one
//! at a time.  It takes care of the session token, the optional
//! `HashSHA256` integrity tag and, when configured with its own
//! `secret_key`, of encrypting secret fields before they leave the client.
//!
//! Unary calls run under a deadline (200 ms unless configured).  A call
//! that times out leaves its reply unread on the connection, so the
//! client refuses further calls after that; reconnect to continue.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::blob::read_chunk;
use crate::crypto::{decrypt_text, encrypt_text, sign_body, SecretKey};
use crate::errors::{KeeperError, Result, Status};
use crate::rpc::messages::{
    AddedResponse, AuthorizeResponse, BankCardData, BankCardsResponse, CredentialData,
    CredentialsResponse, DownloadChunk, DownloadRequest, DownloadResponse, EchoMessage, Empty,
    FileInfo, FilesResponse, IdRequest, NoteData, NotesResponse, UploadRequest, UploadResponse,
    UserRequest,
};
use crate::rpc::{canonical_body, Metadata, Method, HASH_KEY, TOKEN_KEY};
use crate::server::frames::{read_frame, write_frame, ClientFrame, ServerFrame};

/// Deadline applied to every unary call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(200);

/// Bytes carried by each upload message.
pub const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Key for the `HashSHA256` tag; must match the server's.
    pub hash_key: Option<SecretKey>,
    /// Client-side key for pre-encrypting secret fields.  The server never
    /// sees it.
    pub secret_key: Option<SecretKey>,
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            hash_key: None,
            secret_key: None,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

pub struct KeeperClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
    options: ClientOptions,
    token: Option<String>,
    broken: bool,
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| KeeperError::Transport(format!("unexpected reply: {e}")))
}

/// Errors after which the connection can no longer be trusted to be in
/// step with the server.
fn breaks_connection(err: &KeeperError) -> bool {
    matches!(
        err,
        KeeperError::Transport(_)
            | KeeperError::Io(_)
            | KeeperError::SerializationError(_)
            | KeeperError::Timeout
    )
}

impl KeeperClient {
    pub async fn connect(addr: impl ToSocketAddrs, options: ClientOptions) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            line: String::new(),
            options,
            token: None,
            broken: false,
        })
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Use a token obtained elsewhere.
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    // ── Plumbing ─────────────────────────────────────────────────────

    fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            return Err(KeeperError::Transport(
                "connection is out of step after a failed call; reconnect".into(),
            ));
        }
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if breaks_connection(e) {
                self.broken = true;
            }
        }
        result
    }

    fn metadata(&self, body: &Value) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        if let Some(token) = &self.token {
            metadata.insert(TOKEN_KEY.to_string(), token.clone());
        }
        if let Some(key) = &self.options.hash_key {
            let tag = sign_body(key.as_bytes(), &canonical_body(body)?)?;
            metadata.insert(HASH_KEY.to_string(), tag);
        }
        Ok(metadata)
    }

    async fn send_call(&mut self, method: Method, body: Value) -> Result<()> {
        let frame = ClientFrame::Call {
            method: method.name().to_string(),
            metadata: self.metadata(&body)?,
            body,
        };
        write_frame(&mut self.writer, &frame).await
    }

    async fn next_frame(&mut self) -> Result<ServerFrame> {
        read_frame(&mut self.reader, &mut self.line)
            .await?
            .ok_or_else(|| KeeperError::Transport("server closed the connection".into()))
    }

    async fn read_reply(&mut self) -> Result<Value> {
        match self.next_frame().await? {
            ServerFrame::Reply { body } => Ok(body),
            ServerFrame::Error { code, message } => Err(Status::new(code, message).into()),
            ServerFrame::DownloadChunk { .. } => Err(KeeperError::Transport(
                "unexpected download chunk".into(),
            )),
        }
    }

    async fn exchange(&mut self, method: Method, body: Value) -> Result<Value> {
        self.send_call(method, body).await?;
        self.read_reply().await
    }

    async fn unary<Req, Resp>(&mut self, method: Method, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.ensure_usable()?;
        let body = serde_json::to_value(request)?;
        let deadline = self.options.timeout;

        let outcome = tokio::time::timeout(deadline, self.exchange(method, body)).await;
        let result = match outcome {
            Ok(reply) => reply.and_then(decode::<Resp>),
            Err(_) => {
                debug!(%method, "call timed out");
                Err(KeeperError::Timeout)
            }
        };
        self.track(result)
    }

    fn seal(&self, value: &str) -> Result<String> {
        match &self.options.secret_key {
            Some(key) => encrypt_text(key.as_bytes(), value),
            None => Ok(value.to_string()),
        }
    }

    fn open(&self, value: &str) -> Result<String> {
        match &self.options.secret_key {
            Some(key) => decrypt_text(key.as_bytes(), value),
            None => Ok(value.to_string()),
        }
    }

    // ── Users ────────────────────────────────────────────────────────

    pub async fn register(&mut self, login: &str, password: &str) -> Result<()> {
        let req = UserRequest {
            login: login.to_string(),
            password: password.to_string(),
        };
        let _: Empty = self.unary(Method::RegisterUser, &req).await?;
        Ok(())
    }

    /// Log in and keep the returned token for later calls.
    pub async fn authorize(&mut self, login: &str, password: &str) -> Result<String> {
        let req = UserRequest {
            login: login.to_string(),
            password: password.to_string(),
        };
        let resp: AuthorizeResponse = self.unary(Method::Authorize, &req).await?;
        self.token = Some(resp.token.clone());
        Ok(resp.token)
    }

    pub async fn echo(&mut self, message: &str) -> Result<String> {
        let req = EchoMessage {
            message: message.to_string(),
        };
        let resp: EchoMessage = self.unary(Method::Echo, &req).await?;
        Ok(resp.message)
    }

    // ── Credentials ──────────────────────────────────────────────────

    fn seal_credential(&self, c: &CredentialData) -> Result<CredentialData> {
        Ok(CredentialData {
            id: c.id,
            login: self.seal(&c.login)?,
            password: self.seal(&c.password)?,
            description: self.seal(&c.description)?,
        })
    }

    fn open_credential(&self, c: CredentialData) -> Result<CredentialData> {
        Ok(CredentialData {
            id: c.id,
            login: self.open(&c.login)?,
            password: self.open(&c.password)?,
            description: self.open(&c.description)?,
        })
    }

    /// Store a credential and return its id.
    pub async fn add_credential(&mut self, credential: &CredentialData) -> Result<i64> {
        let req = self.seal_credential(credential)?;
        let resp: AddedResponse = self.unary(Method::AddCredential, &req).await?;
        Ok(resp.id)
    }

    pub async fn get_credential(&mut self, id: i64) -> Result<CredentialData> {
        let resp = self.unary(Method::GetCredential, &IdRequest { id }).await?;
        self.open_credential(resp)
    }

    pub async fn get_credentials(&mut self) -> Result<Vec<CredentialData>> {
        let resp: CredentialsResponse = self.unary(Method::GetCredentials, &Empty {}).await?;
        resp.credentials
            .into_iter()
            .map(|c| self.open_credential(c))
            .collect()
    }

    pub async fn remove_credential(&mut self, id: i64) -> Result<()> {
        let _: Empty = self.unary(Method::RemoveCredential, &IdRequest { id }).await?;
        Ok(())
    }

    // ── Notes ────────────────────────────────────────────────────────

    fn open_note(&self, n: NoteData) -> Result<NoteData> {
        Ok(NoteData {
            id: n.id,
            text: self.open(&n.text)?,
            description: self.open(&n.description)?,
        })
    }

    pub async fn add_note(&mut self, text: &str, description: &str) -> Result<i64> {
        let req = NoteData {
            id: 0,
            text: self.seal(text)?,
            description: self.seal(description)?,
        };
        let resp: AddedResponse = self.unary(Method::AddNote, &req).await?;
        Ok(resp.id)
    }

    pub async fn get_note(&mut self, id: i64) -> Result<NoteData> {
        let resp = self.unary(Method::GetNote, &IdRequest { id }).await?;
        self.open_note(resp)
    }

    pub async fn get_notes(&mut self) -> Result<Vec<NoteData>> {
        let resp: NotesResponse = self.unary(Method::GetNotes, &Empty {}).await?;
        resp.notes.into_iter().map(|n| self.open_note(n)).collect()
    }

    pub async fn remove_note(&mut self, id: i64) -> Result<()> {
        let _: Empty = self.unary(Method::RemoveNote, &IdRequest { id }).await?;
        Ok(())
    }

    // ── Bank cards ───────────────────────────────────────────────────

    fn seal_card(&self, c: &BankCardData) -> Result<BankCardData> {
        Ok(BankCardData {
            id: c.id,
            number: self.seal(&c.number)?,
            owner: self.seal(&c.owner)?,
            expire_date: self.seal(&c.expire_date)?,
            cvv: self.seal(&c.cvv)?,
            description: self.seal(&c.description)?,
        })
    }

    fn open_card(&self, c: BankCardData) -> Result<BankCardData> {
        Ok(BankCardData {
            id: c.id,
            number: self.open(&c.number)?,
            owner: self.open(&c.owner)?,
            expire_date: self.open(&c.expire_date)?,
            cvv: self.open(&c.cvv)?,
            description: self.open(&c.description)?,
        })
    }

    pub async fn add_card(&mut self, card: &BankCardData) -> Result<i64> {
        let req = self.seal_card(card)?;
        let resp: AddedResponse = self.unary(Method::AddBankCard, &req).await?;
        Ok(resp.id)
    }

    pub async fn get_card(&mut self, id: i64) -> Result<BankCardData> {
        let resp = self.unary(Method::GetBankCard, &IdRequest { id }).await?;
        self.open_card(resp)
    }

    pub async fn get_cards(&mut self) -> Result<Vec<BankCardData>> {
        let resp: BankCardsResponse = self.unary(Method::GetBankCards, &Empty {}).await?;
        resp.cards.into_iter().map(|c| self.open_card(c)).collect()
    }

    pub async fn remove_card(&mut self, id: i64) -> Result<()> {
        let _: Empty = self.unary(Method::RemoveBankCard, &IdRequest { id }).await?;
        Ok(())
    }

    // ── Files ────────────────────────────────────────────────────────

    pub async fn get_files(&mut self) -> Result<Vec<FileInfo>> {
        let resp: FilesResponse = self.unary(Method::GetFiles, &Empty {}).await?;
        Ok(resp.files)
    }

    pub async fn remove_file(&mut self, id: i64) -> Result<()> {
        let _: Empty = self.unary(Method::RemoveFile, &IdRequest { id }).await?;
        Ok(())
    }

    /// Upload `size` bytes read from `reader` under `name`.
    ///
    /// Streaming calls have no deadline.
    pub async fn upload_reader<R>(
        &mut self,
        name: &str,
        description: &str,
        size: u64,
        reader: &mut R,
    ) -> Result<UploadResponse>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_usable()?;
        let result = self.stream_upload(name, description, size, reader).await;
        self.track(result)
    }

    async fn stream_upload<R>(
        &mut self,
        name: &str,
        description: &str,
        size: u64,
        reader: &mut R,
    ) -> Result<UploadResponse>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let n = read_chunk(reader, &mut buf).await?;
        let first = UploadRequest {
            name: name.to_string(),
            size,
            content_type: String::new(),
            description: description.to_string(),
            chunk: buf[..n].to_vec(),
        };
        self.send_call(Method::Upload, serde_json::to_value(&first)?)
            .await?;

        let mut last = n;
        while last == buf.len() {
            last = read_chunk(reader, &mut buf).await?;
            if last == 0 {
                break;
            }
            let body = serde_json::to_value(UploadRequest::chunk(buf[..last].to_vec()))?;
            write_frame(&mut self.writer, &ClientFrame::UploadChunk { body }).await?;
        }
        write_frame(&mut self.writer, &ClientFrame::UploadEnd).await?;

        decode(self.read_reply().await?)
    }

    pub async fn upload_bytes(
        &mut self,
        name: &str,
        description: &str,
        data: &[u8],
    ) -> Result<UploadResponse> {
        let mut reader = data;
        self.upload_reader(name, description, data.len() as u64, &mut reader)
            .await
    }

    /// Upload a local file under its file name.
    pub async fn upload_file(&mut self, path: &Path, description: &str) -> Result<UploadResponse> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KeeperError::invalid("invalid file name"))?
            .to_string();
        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        self.upload_reader(&name, description, size, &mut file).await
    }

    /// Stream a file into `writer`.
    pub async fn download_to<W>(
        &mut self,
        request: &DownloadRequest,
        writer: &mut W,
    ) -> Result<DownloadResponse>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.ensure_usable()?;
        let result = self.stream_download(request, writer).await;
        self.track(result)
    }

    async fn stream_download<W>(
        &mut self,
        request: &DownloadRequest,
        writer: &mut W,
    ) -> Result<DownloadResponse>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.send_call(Method::Download, serde_json::to_value(request)?)
            .await?;
        loop {
            match self.next_frame().await? {
                ServerFrame::DownloadChunk { body } => {
                    let chunk: DownloadChunk = decode(body)?;
                    writer.write_all(&chunk.chunk).await?;
                }
                ServerFrame::Reply { body } => {
                    writer.flush().await?;
                    return decode(body);
                }
                ServerFrame::Error { code, message } => {
                    return Err(Status::new(code, message).into())
                }
            }
        }
    }

    /// Download a file by name into memory.
    pub async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        let request = DownloadRequest {
            name: name.to_string(),
            id: 0,
        };
        let mut out = Vec::new();
        self.download_to(&request, &mut out).await?;
        Ok(out)
    }
}
