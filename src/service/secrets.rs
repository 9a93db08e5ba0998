//! Credentials, notes and bank cards.
//!
//! Every secret field goes through the field cipher on the way in and out.
//! Lookups and removals are scoped to the authenticated user, so another
//! user's record id is indistinguishable from a missing one.

use tracing::{debug, error};

use super::{failure, KeeperService};
use crate::errors::{KeeperError, Result};
use crate::rpc::messages::{
    AddedResponse, BankCardData, BankCardsResponse, CredentialData, CredentialsResponse, Empty,
    IdRequest, NoteData, NotesResponse,
};
use crate::rpc::AuthenticatedCall;
use crate::storage::{BankCard, Credential, Note};

fn check_id(req: IdRequest) -> Result<i64> {
    if req.id <= 0 {
        return Err(KeeperError::invalid("invalid id"));
    }
    Ok(req.id)
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl KeeperService {
    fn open_field(&self, stored: &str) -> Result<String> {
        self.cipher.open(stored).map_err(|e| {
            error!(error = %e, "error decrypt data");
            KeeperError::internal("error decrypt data")
        })
    }

    fn seal_field(&self, value: &str) -> Result<String> {
        self.cipher.seal(value).map_err(failure("error encrypt data"))
    }

    // --- Credentials ---

    fn open_credential(&self, c: Credential) -> Result<CredentialData> {
        Ok(CredentialData {
            id: c.id,
            login: self.open_field(&c.login)?,
            password: self.open_field(&c.password)?,
            description: self.open_field(&c.description)?,
        })
    }

    pub(crate) async fn add_credential(
        &self,
        auth: AuthenticatedCall,
        data: CredentialData,
    ) -> Result<AddedResponse> {
        if blank(&data.login) || blank(&data.password) {
            return Err(KeeperError::invalid("you must provide: login and password"));
        }
        let row = Credential {
            id: 0,
            user_id: auth.user_id,
            login: self.seal_field(&data.login)?,
            password: self.seal_field(&data.password)?,
            description: self.seal_field(&data.description)?,
        };
        let id = self
            .storage
            .add_credential(&row)
            .await
            .map_err(failure("error add user credentials"))?;
        debug!(user_id = auth.user_id, id, "credential added");
        Ok(AddedResponse { id })
    }

    pub(crate) async fn get_credential(
        &self,
        auth: AuthenticatedCall,
        req: IdRequest,
    ) -> Result<CredentialData> {
        let id = check_id(req)?;
        let row = self
            .storage
            .get_credential(auth.user_id, id)
            .await
            .map_err(failure("error get credentials"))?
            .ok_or_else(|| KeeperError::not_found("credentials not found"))?;
        self.open_credential(row)
    }

    pub(crate) async fn get_credentials(
        &self,
        auth: AuthenticatedCall,
    ) -> Result<CredentialsResponse> {
        let rows = self
            .storage
            .get_credentials(auth.user_id)
            .await
            .map_err(failure("error get credentials"))?;
        let credentials = rows
            .into_iter()
            .map(|c| self.open_credential(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(CredentialsResponse { credentials })
    }

    pub(crate) async fn remove_credential(
        &self,
        auth: AuthenticatedCall,
        req: IdRequest,
    ) -> Result<Empty> {
        let id = check_id(req)?;
        let removed = self
            .storage
            .remove_credential(auth.user_id, id)
            .await
            .map_err(failure("error remove credentials"))?;
        if !removed {
            return Err(KeeperError::not_found("credentials not found"));
        }
        Ok(Empty {})
    }

    // --- Notes ---

    fn open_note(&self, n: Note) -> Result<NoteData> {
        Ok(NoteData {
            id: n.id,
            text: self.open_field(&n.text)?,
            description: self.open_field(&n.description)?,
        })
    }

    pub(crate) async fn add_note(
        &self,
        auth: AuthenticatedCall,
        data: NoteData,
    ) -> Result<AddedResponse> {
        if blank(&data.text) {
            return Err(KeeperError::invalid("note text is required"));
        }
        let row = Note {
            id: 0,
            user_id: auth.user_id,
            text: self.seal_field(&data.text)?,
            description: self.seal_field(&data.description)?,
        };
        let id = self
            .storage
            .add_note(&row)
            .await
            .map_err(failure("error add note"))?;
        debug!(user_id = auth.user_id, id, "note added");
        Ok(AddedResponse { id })
    }

    pub(crate) async fn get_note(&self, auth: AuthenticatedCall, req: IdRequest) -> Result<NoteData> {
        let id = check_id(req)?;
        let row = self
            .storage
            .get_note(auth.user_id, id)
            .await
            .map_err(failure("error get note"))?
            .ok_or_else(|| KeeperError::not_found("note not found"))?;
        self.open_note(row)
    }

    pub(crate) async fn get_notes(&self, auth: AuthenticatedCall) -> Result<NotesResponse> {
        let rows = self
            .storage
            .get_notes(auth.user_id)
            .await
            .map_err(failure("error get notes"))?;
        let notes = rows
            .into_iter()
            .map(|n| self.open_note(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(NotesResponse { notes })
    }

    pub(crate) async fn remove_note(&self, auth: AuthenticatedCall, req: IdRequest) -> Result<Empty> {
        let id = check_id(req)?;
        let removed = self
            .storage
            .remove_note(auth.user_id, id)
            .await
            .map_err(failure("error remove note"))?;
        if !removed {
            return Err(KeeperError::not_found("note not found"));
        }
        Ok(Empty {})
    }

    // --- Bank cards ---

    fn open_card(&self, c: BankCard) -> Result<BankCardData> {
        Ok(BankCardData {
            id: c.id,
            number: self.open_field(&c.number)?,
            owner: self.open_field(&c.owner)?,
            expire_date: self.open_field(&c.expire_date)?,
            cvv: self.open_field(&c.cvv)?,
            description: self.open_field(&c.description)?,
        })
    }

    pub(crate) async fn add_card(
        &self,
        auth: AuthenticatedCall,
        data: BankCardData,
    ) -> Result<AddedResponse> {
        if blank(&data.number) || blank(&data.owner) || blank(&data.expire_date) || blank(&data.cvv)
        {
            return Err(KeeperError::invalid("some of the card info is missed"));
        }
        let row = BankCard {
            id: 0,
            user_id: auth.user_id,
            number: self.seal_field(&data.number)?,
            owner: self.seal_field(&data.owner)?,
            expire_date: self.seal_field(&data.expire_date)?,
            cvv: self.seal_field(&data.cvv)?,
            description: self.seal_field(&data.description)?,
        };
        let id = self
            .storage
            .add_card(&row)
            .await
            .map_err(failure("error add bank card"))?;
        debug!(user_id = auth.user_id, id, "bank card added");
        Ok(AddedResponse { id })
    }

    pub(crate) async fn get_card(
        &self,
        auth: AuthenticatedCall,
        req: IdRequest,
    ) -> Result<BankCardData> {
        let id = check_id(req)?;
        let row = self
            .storage
            .get_card(auth.user_id, id)
            .await
            .map_err(failure("error get bank card"))?
            .ok_or_else(|| KeeperError::not_found("bank card not found"))?;
        self.open_card(row)
    }

    pub(crate) async fn get_cards(&self, auth: AuthenticatedCall) -> Result<BankCardsResponse> {
        let rows = self
            .storage
            .get_cards(auth.user_id)
            .await
            .map_err(failure("error get bank cards"))?;
        let cards = rows
            .into_iter()
            .map(|c| self.open_card(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(BankCardsResponse { cards })
    }

    pub(crate) async fn remove_card(&self, auth: AuthenticatedCall, req: IdRequest) -> Result<Empty> {
        let id = check_id(req)?;
        let removed = self
            .storage
            .remove_card(auth.user_id, id)
            .await
            .map_err(failure("error remove bank card"))?;
        if !removed {
            return Err(KeeperError::not_found("bank card not found"));
        }
        Ok(Empty {})
    }
}
