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

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, error, trace, warn};

use super::signal::GrantSignal;
use crate::{Error, Result};

/// Handle identifying an account opened with a [`ResourceDispatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dispatcher configuration. Negative or inconsistent values are clamped
/// when the dispatcher is created.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Name used in log messages
    pub name: String,
    /// Number of accounts the reserved pool is sized for
    pub min_accounts: i64,
    /// Items each account is guaranteed from the reserved pool
    pub min_reserved_per_account: i64,
    /// Upper bound on the items an account may hold as its own share
    pub max_reserved_per_account: i64,
    /// Size of the shared extra pool
    pub extra_items: i64,
    /// Items an account may borrow from the extra pool. Negative means the
    /// whole extra pool.
    pub max_extra_per_account: i64,
    /// Items of the extra pool never handed out as account shares
    pub min_extra_pool_floor: i64,
    /// Serve starved accounts in arrival order
    pub round_robin: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "dispatcher".to_string(),
            min_accounts: 1,
            min_reserved_per_account: 1,
            max_reserved_per_account: 1,
            extra_items: 0,
            max_extra_per_account: -1,
            min_extra_pool_floor: 0,
            round_robin: false,
        }
    }
}

struct Account<T> {
    /// Items still available to this account. Goes negative when items
    /// are borrowed from the extra pool.
    balance: i64,
    /// Portion of the share taken from the reserved pool
    reserved_share: i64,
    /// Portion of the share taken from the extra pool
    extra_share: i64,
    /// Lowest value `balance` may reach
    extra_floor: i64,
    needs_item: bool,
    /// A task is parked in `acquire_item()`
    waiting: bool,
    /// An item was handed to the parked task and not yet picked up
    handed_off: bool,
    user_object: T,
    signal: Arc<GrantSignal>,
}

impl<T> Account<T> {
    fn share(&self) -> i64 {
        self.reserved_share + self.extra_share
    }

    fn borrowed(&self) -> i64 {
        (-self.balance).max(0)
    }

    /// Whether the account is starved and could take an item from the
    /// extra pool.
    fn can_borrow(&self) -> bool {
        self.needs_item && self.balance <= 0 && self.balance > self.extra_floor
    }

    /// Record that this account was given an item by someone else.
    fn deliver(&mut self) {
        self.needs_item = false;
        if self.waiting {
            self.handed_off = true;
            self.signal.notify();
        }
    }
}

struct DispatcherState<T> {
    reserved_pool: i64,
    extra_pool: i64,
    next_id: u64,
    accounts: HashMap<AccountId, Account<T>>,
    /// Starved accounts in the order they became eligible
    eligible: VecDeque<AccountId>,
}

/// Fair-share dispatcher of abstract items (connection slots, worker
/// threads...) across client accounts.
///
/// Every account gets a share taken from the reserved pool, and possibly
/// from the extra pool, when it is opened. Once an account has used up its
/// share it may borrow from the extra pool, up to its own limit. With
/// round-robin enabled, items given back to the extra pool go to starved
/// accounts in the order they asked.
///
/// All state sits behind one lock; every operation is short and never
/// blocks on I/O.
pub struct ResourceDispatcher<T> {
    name: String,
    round_robin: bool,
    min_reserved_per_account: i64,
    max_reserved_per_account: i64,
    max_extra_per_account: i64,
    min_extra_pool_floor: i64,
    state: Mutex<DispatcherState<T>>,
}

impl<T: Clone> ResourceDispatcher<T> {
    pub fn new(config: DispatcherConfig) -> Arc<Self> {
        let min_accounts = config.min_accounts.max(0);
        let min_reserved = config.min_reserved_per_account.max(0);
        let max_reserved = config.max_reserved_per_account.max(min_reserved);
        let extra_items = config.extra_items.max(0);
        let min_extra_pool_floor = config.min_extra_pool_floor.max(0);
        let max_extra = match config.max_extra_per_account {
            n if n < 0 => extra_items,
            n => n,
        };

        debug!(
            target: "dispatch::dispatcher::new()",
            "[{}] reserved={} extra={} per-account=[{}..{}] max_extra={} floor={} rr={}",
            config.name, min_accounts * min_reserved, extra_items, min_reserved, max_reserved,
            max_extra, min_extra_pool_floor, config.round_robin,
        );

        Arc::new(Self {
            name: config.name,
            round_robin: config.round_robin,
            min_reserved_per_account: min_reserved,
            max_reserved_per_account: max_reserved,
            max_extra_per_account: max_extra,
            min_extra_pool_floor,
            state: Mutex::new(DispatcherState {
                reserved_pool: min_accounts * min_reserved,
                extra_pool: extra_items,
                next_id: 0,
                accounts: HashMap::new(),
                eligible: VecDeque::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a new account asking for `requested_reserved` items of its own.
    ///
    /// The first `min_reserved_per_account` items come from the reserved
    /// pool, anything above that from the extra pool as long as the pool
    /// floor is kept. If the reserved pool runs dry the minimum is topped up
    /// from the extra pool on a best-effort basis.
    ///
    /// `max_extra` bounds how many items the account may borrow once its
    /// share is used up. Negative means the configured maximum.
    pub fn new_account(&self, requested_reserved: i64, max_extra: i64, user_object: T) -> AccountId {
        let mut state = self.lock();

        let mut wanted = requested_reserved.clamp(0, self.max_reserved_per_account);
        let mut extra = 0;

        if wanted > self.min_reserved_per_account {
            let available = (state.extra_pool - self.min_extra_pool_floor).max(0);
            extra = (wanted - self.min_reserved_per_account).min(available);
            wanted = self.min_reserved_per_account;
        }

        let reserved = wanted.min(state.reserved_pool);
        if reserved < wanted {
            let missing = wanted - reserved;
            let topup = missing.min((state.extra_pool - extra).max(0));
            extra += topup;

            if topup < missing {
                warn!(
                    target: "dispatch::dispatcher::new_account()",
                    "[{}] Account under-provisioned: got {} of the {} guaranteed items",
                    self.name, reserved + topup, self.min_reserved_per_account,
                );
            }
        }

        state.reserved_pool -= reserved;
        state.extra_pool -= extra;

        let max_extra = match max_extra {
            n if n < 0 || n > self.max_extra_per_account => self.max_extra_per_account,
            n => n,
        };

        let id = AccountId(state.next_id);
        state.next_id += 1;

        state.accounts.insert(
            id,
            Account {
                balance: reserved + extra,
                reserved_share: reserved,
                extra_share: extra,
                extra_floor: -max_extra,
                needs_item: false,
                waiting: false,
                handed_off: false,
                user_object,
                signal: Arc::new(GrantSignal::new()),
            },
        );

        debug!(
            target: "dispatch::dispatcher::new_account()",
            "[{}] Opened account {} (reserved={}, extra={}, max_extra={})",
            self.name, id, reserved, extra, max_extra,
        );

        id
    }

    /// Try to take one item for the account. Denial is not an error: the
    /// account is flagged as needing an item and, with round-robin, queued
    /// for the next item given back to the extra pool. With round-robin an
    /// item from the extra pool only goes to the head of the eligible queue.
    pub fn obtain_item(&self, id: AccountId) -> bool {
        let mut state = self.lock();
        self.obtain_item_locked(&mut state, id)
    }

    fn obtain_item_locked(&self, state: &mut DispatcherState<T>, id: AccountId) -> bool {
        let DispatcherState { accounts, eligible, extra_pool, .. } = &mut *state;
        Self::prune_eligible(accounts, eligible);
        let Some(acc) = accounts.get_mut(&id) else { return false };

        let granted = if acc.balance > 0 {
            true
        } else if acc.balance <= acc.extra_floor {
            trace!(
                target: "dispatch::dispatcher::obtain_item()",
                "[{}] Account {} reached its extra limit", self.name, id,
            );
            false
        } else if *extra_pool == 0 {
            false
        } else if self.round_robin && eligible.front().is_some_and(|e| *e != id) {
            trace!(
                target: "dispatch::dispatcher::obtain_item()",
                "[{}] Account {} queued behind {} eligible account(s)",
                self.name, id, eligible.len(),
            );
            false
        } else {
            *extra_pool -= 1;
            true
        };

        if granted {
            acc.balance -= 1;
            acc.needs_item = false;
            eligible.retain(|e| *e != id);
            // Whoever is next in line may be parked on what is left
            if self.round_robin && *extra_pool > 0 {
                self.redistribute(state);
            }
            return true
        }

        acc.needs_item = true;
        if self.round_robin && acc.can_borrow() && !eligible.contains(&id) {
            trace!(
                target: "dispatch::dispatcher::obtain_item()",
                "[{}] Account {} is now eligible", self.name, id,
            );
            eligible.push_back(id);
        }

        false
    }

    /// Take `n` items at once, or none at all.
    pub fn obtain_quantity(&self, id: AccountId, n: i64) -> bool {
        if n <= 0 {
            return true
        }

        let mut state = self.lock();
        let DispatcherState { accounts, eligible, extra_pool, .. } = &mut *state;
        Self::prune_eligible(accounts, eligible);
        let Some(acc) = accounts.get_mut(&id) else { return false };

        let from_extra = (n - acc.balance.max(0)).max(0);
        let granted = acc.balance - n >= acc.extra_floor &&
            from_extra <= *extra_pool &&
            (from_extra == 0 ||
                !self.round_robin ||
                eligible.front().map_or(true, |e| *e == id));

        if granted {
            *extra_pool -= from_extra;
            acc.balance -= n;
            acc.needs_item = false;
            eligible.retain(|e| *e != id);
            if self.round_robin && *extra_pool > 0 {
                self.redistribute(&mut state);
            }
            return true
        }

        acc.needs_item = true;
        if self.round_robin && acc.can_borrow() && !eligible.contains(&id) {
            trace!(
                target: "dispatch::dispatcher::obtain_quantity()",
                "[{}] Account {} is now eligible", self.name, id,
            );
            eligible.push_back(id);
        }

        false
    }

    /// Give back one item.
    ///
    /// Returns the account that now holds the item: the same account if it
    /// still needs one, another starved account when round-robin hands it
    /// over, or `None` when the item went back to a pool. Callers must
    /// process the returned account and keep going until `None`:
    ///
    /// ```ignore
    /// let mut next = dispatcher.release_item(id);
    /// while let Some(account) = next {
    ///     // run the work queued for `account`
    ///     next = dispatcher.release_item(account);
    /// }
    /// ```
    ///
    /// If the receiving account has a task parked in `acquire_item()`, that
    /// task is woken and owns the item.
    pub fn release_item(&self, id: AccountId) -> Option<AccountId> {
        let mut state = self.lock();
        let DispatcherState { accounts, eligible, extra_pool, .. } = &mut *state;

        let Some(acc) = accounts.get_mut(&id) else {
            debug!(
                target: "dispatch::dispatcher::release_item()",
                "[{}] Release on unknown account {}", self.name, id,
            );
            return None
        };

        if acc.balance >= acc.share() {
            error!(
                target: "dispatch::dispatcher::release_item()",
                "[{}] Accounting drift: account {} released more than it obtained \
                 (balance={}, share={})",
                self.name, id, acc.balance, acc.share(),
            );
            return None
        }

        let borrowed = acc.balance < 0;
        acc.balance += 1;

        // Items from the account's own share stay with it.
        if !borrowed || !self.round_robin {
            if acc.needs_item {
                acc.balance -= 1;
                acc.deliver();
                eligible.retain(|e| *e != id);
                return Some(id)
            }

            if borrowed {
                *extra_pool += 1;
                Self::wake_waiters(accounts);
            }
            return None
        }

        // Round-robin: queue ourselves behind whoever is already waiting,
        // then give the item to the oldest eligible account.
        if acc.can_borrow() {
            if !eligible.contains(&id) {
                eligible.push_back(id);
            }
        } else {
            eligible.retain(|e| *e != id);
        }

        while let Some(next) = eligible.pop_front() {
            let Some(acc) = accounts.get_mut(&next) else { continue };
            if !acc.can_borrow() {
                continue
            }

            acc.balance -= 1;
            acc.deliver();
            trace!(
                target: "dispatch::dispatcher::release_item()",
                "[{}] Item released by {} handed to {}", self.name, id, next,
            );
            return Some(next)
        }

        *extra_pool += 1;
        None
    }

    /// Give back `n` items at once. Borrowed items go straight back to the
    /// extra pool.
    pub fn release_quantity(&self, id: AccountId, n: i64) {
        if n <= 0 {
            return
        }

        let mut state = self.lock();
        let Some(acc) = state.accounts.get_mut(&id) else { return };

        let mut n = n;
        if acc.balance + n > acc.share() {
            error!(
                target: "dispatch::dispatcher::release_quantity()",
                "[{}] Accounting drift: account {} released {} items with balance={} share={}",
                self.name, id, n, acc.balance, acc.share(),
            );
            n = acc.share() - acc.balance;
        }

        let to_pool = n.min(acc.borrowed());
        acc.balance += n;
        state.extra_pool += to_pool;

        if to_pool > 0 {
            self.redistribute(&mut state);
        }
    }

    /// Flag whether the account wants an item. With round-robin an account
    /// that needs an item and can borrow one joins the eligible queue.
    pub fn in_need(&self, id: AccountId, needs: bool) {
        let mut state = self.lock();
        let DispatcherState { accounts, eligible, .. } = &mut *state;
        let Some(acc) = accounts.get_mut(&id) else { return };

        acc.needs_item = needs;
        if self.round_robin && acc.can_borrow() {
            if !eligible.contains(&id) {
                eligible.push_back(id);
            }
        } else {
            eligible.retain(|e| *e != id);
        }
    }

    /// Wait until an item is granted to the account.
    ///
    /// Tries `obtain_item()` first and otherwise parks until an item is
    /// handed over (round-robin) or released to the extra pool. Fails with
    /// [`Error::AccountClosed`] if the account is closed meanwhile.
    pub async fn acquire_item(&self, id: AccountId) -> Result<()> {
        let signal = match self.lock().accounts.get(&id) {
            Some(acc) => acc.signal.clone(),
            None => return Err(Error::UnknownAccount),
        };

        loop {
            signal.reset();

            {
                let mut state = self.lock();
                let Some(acc) = state.accounts.get_mut(&id) else {
                    return Err(Error::AccountClosed)
                };

                if acc.handed_off {
                    acc.handed_off = false;
                    acc.waiting = false;
                    return Ok(())
                }

                if self.obtain_item_locked(&mut state, id) {
                    if let Some(acc) = state.accounts.get_mut(&id) {
                        acc.waiting = false;
                    }
                    return Ok(())
                }

                if let Some(acc) = state.accounts.get_mut(&id) {
                    acc.waiting = true;
                }
            }

            signal.wait().await;
        }
    }

    /// Close the account and return its share to the pools. Closing twice
    /// is a no-op.
    ///
    /// Items still checked out are reclaimed as well: a warning is logged
    /// and the holder must not use them anymore.
    pub fn close(&self, id: AccountId) {
        let mut state = self.lock();
        let Some(acc) = state.accounts.remove(&id) else { return };
        state.eligible.retain(|e| *e != id);

        if acc.balance != acc.share() {
            warn!(
                target: "dispatch::dispatcher::close()",
                "[{}] Account {} closed with {} item(s) outstanding",
                self.name, id, acc.share() - acc.balance,
            );
        }

        if acc.balance > acc.share() {
            error!(
                target: "dispatch::dispatcher::close()",
                "[{}] Accounting drift on account {}: balance={} share={}",
                self.name, id, acc.balance, acc.share(),
            );
        }

        state.reserved_pool += acc.reserved_share;
        state.extra_pool += acc.extra_share + acc.borrowed();

        debug!(
            target: "dispatch::dispatcher::close()",
            "[{}] Closed account {}: reserved_pool={} extra_pool={}",
            self.name, id, state.reserved_pool, state.extra_pool,
        );

        // Wake a task parked on this account so it sees the closure.
        acc.signal.notify();
        self.redistribute(&mut state);
    }

    /// Offer items sitting in the extra pool to waiting accounts.
    ///
    /// With round-robin, items go to the head of the eligible queue while
    /// it is parked. A head that is not parked keeps the items in the pool
    /// until it retries `obtain_item()`, and nobody behind it is served.
    fn redistribute(&self, state: &mut DispatcherState<T>) {
        let DispatcherState { accounts, eligible, extra_pool, .. } = state;

        if !self.round_robin {
            if *extra_pool > 0 {
                Self::wake_waiters(accounts);
            }
            return
        }

        while *extra_pool > 0 {
            Self::prune_eligible(accounts, eligible);
            let Some(&head) = eligible.front() else { break };
            let Some(acc) = accounts.get_mut(&head) else { break };
            if !acc.waiting {
                break
            }

            eligible.pop_front();
            *extra_pool -= 1;
            acc.balance -= 1;
            acc.deliver();
            trace!(
                target: "dispatch::dispatcher::redistribute()",
                "[{}] Pooled item handed to {}", self.name, head,
            );
        }
    }

    /// Drop entries at the head of the eligible queue that are gone or can
    /// no longer borrow.
    fn prune_eligible(accounts: &HashMap<AccountId, Account<T>>, eligible: &mut VecDeque<AccountId>) {
        while let Some(head) = eligible.front() {
            if accounts.get(head).is_some_and(|a| a.can_borrow()) {
                break
            }
            eligible.pop_front();
        }
    }

    fn wake_waiters(accounts: &HashMap<AccountId, Account<T>>) {
        for acc in accounts.values().filter(|a| a.waiting && a.needs_item) {
            acc.signal.notify();
        }
    }

    pub fn reserved_pool(&self) -> i64 {
        self.lock().reserved_pool
    }

    pub fn extra_pool(&self) -> i64 {
        self.lock().extra_pool
    }

    pub fn account_count(&self) -> usize {
        self.lock().accounts.len()
    }

    pub fn balance(&self, id: AccountId) -> Option<i64> {
        self.lock().accounts.get(&id).map(|a| a.balance)
    }

    /// Items the account took from the reserved pool
    pub fn reserved_share(&self, id: AccountId) -> Option<i64> {
        self.lock().accounts.get(&id).map(|a| a.reserved_share)
    }

    /// Items the account took from the extra pool as part of its share
    pub fn extra_share(&self, id: AccountId) -> Option<i64> {
        self.lock().accounts.get(&id).map(|a| a.extra_share)
    }

    /// Items the account currently borrows from the extra pool
    pub fn borrowed(&self, id: AccountId) -> Option<i64> {
        self.lock().accounts.get(&id).map(|a| a.borrowed())
    }

    pub fn needs_item(&self, id: AccountId) -> Option<bool> {
        self.lock().accounts.get(&id).map(|a| a.needs_item)
    }

    pub fn is_eligible(&self, id: AccountId) -> bool {
        self.lock().eligible.contains(&id)
    }

    pub fn user_object(&self, id: AccountId) -> Option<T> {
        self.lock().accounts.get(&id).map(|a| a.user_object.clone())
    }

    pub fn set_user_object(&self, id: AccountId, user_object: T) -> Result<()> {
        match self.lock().accounts.get_mut(&id) {
            Some(acc) => {
                acc.user_object = user_object;
                Ok(())
            }
            None => Err(Error::UnknownAccount),
        }
    }
}

/// An account bundled with its dispatcher. The account is closed when the
/// handle is dropped.
pub struct ResourceAccount<T: Clone> {
    dispatcher: Arc<ResourceDispatcher<T>>,
    id: AccountId,
}

impl<T: Clone> ResourceAccount<T> {
    pub fn new(
        dispatcher: Arc<ResourceDispatcher<T>>,
        requested_reserved: i64,
        max_extra: i64,
        user_object: T,
    ) -> Self {
        let id = dispatcher.new_account(requested_reserved, max_extra, user_object);
        Self { dispatcher, id }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn dispatcher(&self) -> &Arc<ResourceDispatcher<T>> {
        &self.dispatcher
    }

    pub fn obtain_item(&self) -> bool {
        self.dispatcher.obtain_item(self.id)
    }

    pub fn obtain_quantity(&self, n: i64) -> bool {
        self.dispatcher.obtain_quantity(self.id, n)
    }

    pub fn release_item(&self) -> Option<AccountId> {
        self.dispatcher.release_item(self.id)
    }

    pub fn release_quantity(&self, n: i64) {
        self.dispatcher.release_quantity(self.id, n)
    }

    pub fn in_need(&self, needs: bool) {
        self.dispatcher.in_need(self.id, needs)
    }

    pub async fn acquire_item(&self) -> Result<()> {
        self.dispatcher.acquire_item(self.id).await
    }

    pub fn balance(&self) -> i64 {
        self.dispatcher.balance(self.id).unwrap_or(0)
    }

    pub fn user_object(&self) -> Option<T> {
        self.dispatcher.user_object(self.id)
    }
}

impl<T: Clone> Drop for ResourceAccount<T> {
    fn drop(&mut self) {
        self.dispatcher.close(self.id);
    }
}
