//! Storage contract consumed by the router, plus the in-memory
//! implementation that backs tests and the default binary.
//!
//! Durability is someone else's problem: the router only needs user lookup
//! and creation by credential, board CRUD scoped to an owning user, and
//! element append/removal/listing scoped to a board id. Implementations
//! synchronize internally; the router adds no locking of its own.

use shared::{Board, Element, User, MAX_CREDENTIAL_SIZE};
use std::collections::HashMap;
use std::sync::Mutex;

/// Fixed-size credential key used to scope boards to their owner.
pub type Credential = [u8; MAX_CREDENTIAL_SIZE];

/// What the server requires from whatever persistence backs it.
pub trait Storage: Send + Sync {
    /// Looks a user up by username. `None` means unknown user.
    fn find_user(&self, username: &Credential) -> Option<User>;

    /// Creates a non-admin user. Returns false when the username is taken.
    fn add_user(&self, username: Credential, password: Credential) -> bool;

    /// Persists a board under the owner, assigning and returning its id.
    fn add_board(&self, owner: &Credential, board: Board) -> i32;

    /// A single board by id, scoped to the owner.
    fn get_board(&self, owner: &Credential, id: i32) -> Option<Board>;

    /// All boards the owner has, in insertion order.
    fn get_boards(&self, owner: &Credential) -> Vec<Board>;

    /// Deletes a board scoped to the owner. Returns false when absent.
    fn remove_board(&self, owner: &Credential, id: i32) -> bool;

    /// Appends one element to a board's history.
    fn add_element(&self, element: Element, board_id: i32);

    /// Removes the most recently added element, if the board has any.
    fn remove_last_element(&self, board_id: i32);

    /// Removes every element of the board.
    fn remove_all_elements(&self, board_id: i32);

    /// The board's elements in append order.
    fn get_elements(&self, board_id: i32) -> Vec<Element>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    users: Vec<User>,
    boards: HashMap<Credential, Vec<Board>>,
    elements: HashMap<i32, Vec<Element>>,
    next_board_id: i32,
}

/// In-memory storage behind a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an administrator account; admins may shut the server down.
    pub fn add_admin(&self, username: Credential, password: Credential) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.push(User {
            username,
            password,
            is_admin: true,
        });
    }
}

impl Storage for MemoryStorage {
    fn find_user(&self, username: &Credential) -> Option<User> {
        let inner = self.inner.lock().unwrap();
        inner
            .users
            .iter()
            .find(|user| &user.username == username)
            .cloned()
    }

    fn add_user(&self, username: Credential, password: Credential) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|user| user.username == username) {
            return false;
        }
        inner.users.push(User {
            username,
            password,
            is_admin: false,
        });
        true
    }

    fn add_board(&self, owner: &Credential, mut board: Board) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_board_id += 1;
        board.id = inner.next_board_id;
        let id = board.id;
        inner.boards.entry(*owner).or_default().push(board);
        id
    }

    fn get_board(&self, owner: &Credential, id: i32) -> Option<Board> {
        let inner = self.inner.lock().unwrap();
        inner
            .boards
            .get(owner)
            .and_then(|boards| boards.iter().find(|board| board.id == id))
            .cloned()
    }

    fn get_boards(&self, owner: &Credential) -> Vec<Board> {
        let inner = self.inner.lock().unwrap();
        inner.boards.get(owner).cloned().unwrap_or_default()
    }

    fn remove_board(&self, owner: &Credential, id: i32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(boards) = inner.boards.get_mut(owner) else {
            return false;
        };
        let before = boards.len();
        boards.retain(|board| board.id != id);
        let removed = boards.len() < before;
        if removed {
            inner.elements.remove(&id);
        }
        removed
    }

    fn add_element(&self, element: Element, board_id: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.elements.entry(board_id).or_default().push(element);
    }

    fn remove_last_element(&self, board_id: i32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(elements) = inner.elements.get_mut(&board_id) {
            elements.pop();
        }
    }

    fn remove_all_elements(&self, board_id: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.elements.remove(&board_id);
    }

    fn get_elements(&self, board_id: i32) -> Vec<Element> {
        let inner = self.inner.lock().unwrap();
        inner.elements.get(&board_id).cloned().unwrap_or_default()
    }
}
