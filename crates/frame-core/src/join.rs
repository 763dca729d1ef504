//! WiFi join state machine.
//!
//! The controller starts a session and then waits once, with a deadline, for a
//! terminal outcome. The radio driver runs on its own task and feeds
//! [`RadioEvent`]s into [`JoinMachine::on_event`]; the machine answers with the
//! [`JoinAction`] the driver should perform and, on a terminal event, wakes the
//! waiting controller through a one-slot signal.
//!
//! ```text
//! Idle -> Joining -> Connected
//!            |  ^
//!            v  |
//!         Retrying -> Failed   (after MAX_RETRIES disconnects)
//! ```

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
use heapless::String;
use log::{debug, info, warn};

use crate::error::{CycleError, Result};

/// Disconnects tolerated before the session fails.
pub const MAX_RETRIES: u8 = 3;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;

/// Credentials as read from configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Credentials<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// Credentials copied into the session when it starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionCredentials {
    ssid: String<MAX_SSID_LEN>,
    password: String<MAX_PASSWORD_LEN>,
}

impl SessionCredentials {
    fn resolve(credentials: Credentials<'_>) -> Result<Self> {
        if credentials.ssid.is_empty() {
            return Err(CycleError::ConfigMissing(crate::settings::WIFI_SSID));
        }
        if credentials.password.is_empty() {
            return Err(CycleError::ConfigMissing(crate::settings::WIFI_PASSWORD));
        }

        let mut ssid = String::new();
        ssid.push_str(credentials.ssid)
            .map_err(|_| CycleError::ConfigMalformed("WIFI_SSID longer than 32 bytes"))?;
        let mut password = String::new();
        password
            .push_str(credentials.password)
            .map_err(|_| CycleError::ConfigMalformed("WIFI_PASSWORD longer than 64 bytes"))?;
        Ok(Self { ssid, password })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinOutcome {
    Connected,
    Failed,
    TimedOut,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinState {
    Idle,
    Joining,
    Retrying,
    Connected,
    Failed,
}

impl JoinState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Connected | Self::Failed)
    }
}

/// Notifications from the radio driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    /// Station interface is up and ready to associate.
    StationStarted,
    /// Association failed or was lost.
    Disconnected { reason: u32 },
    /// DHCP handed out an address.
    AddressAcquired,
}

/// What the driver must do after delivering an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinAction {
    None,
    Connect,
}

/// Radio bring-up and teardown, as seen from the controller's context.
///
/// `bring_up` must return without waiting for association; progress is
/// reported back through [`JoinMachine::on_event`].
pub trait Radio {
    type Error: fmt::Debug;

    fn bring_up(&mut self, credentials: &SessionCredentials) -> Result<(), Self::Error>;

    fn shut_down(&mut self);
}

struct JoinSession {
    state: JoinState,
    retries: u8,
    last_reason: Option<u32>,
    credentials: SessionCredentials,
}

pub struct JoinMachine<M: RawMutex> {
    session: Mutex<M, RefCell<Option<JoinSession>>>,
    outcome: Signal<M, JoinOutcome>,
}

impl<M: RawMutex> Default for JoinMachine<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> JoinMachine<M> {
    pub const fn new() -> Self {
        Self {
            session: Mutex::new(RefCell::new(None)),
            outcome: Signal::new(),
        }
    }

    /// Validate credentials, subscribe to radio events and bring the radio up.
    ///
    /// Only one session may exist at a time; the returned handle stops the
    /// session when dropped.
    pub fn start<'m, R: Radio>(
        &'m self,
        radio: &'m mut R,
        credentials: Credentials<'_>,
    ) -> Result<SessionHandle<'m, M, R>> {
        let credentials = SessionCredentials::resolve(credentials)?;

        self.outcome.reset();
        self.session.lock(|cell| {
            cell.replace(Some(JoinSession {
                state: JoinState::Joining,
                retries: 0,
                last_reason: None,
                credentials: credentials.clone(),
            }))
        });

        if let Err(err) = radio.bring_up(&credentials) {
            warn!("radio bring-up failed: {err:?}");
            self.end_session();
            radio.shut_down();
            return Err(CycleError::JoinFailed);
        }

        info!("Connecting to {}...", credentials.ssid());
        Ok(SessionHandle {
            machine: self,
            radio,
            active: true,
        })
    }

    /// Deliver a radio event. Runs on the driver's context.
    pub fn on_event(&self, event: RadioEvent) -> JoinAction {
        self.session.lock(|cell| {
            let mut slot = cell.borrow_mut();
            let Some(session) = slot.as_mut() else {
                debug!("{event:?} with no join session, ignored");
                return JoinAction::None;
            };
            if session.state.is_terminal() {
                debug!("{event:?} after {:?}, ignored", session.state);
                return JoinAction::None;
            }

            match event {
                RadioEvent::StationStarted => {
                    session.state = JoinState::Joining;
                    JoinAction::Connect
                }
                RadioEvent::Disconnected { reason } => {
                    info!("WiFi disconnected, reason: {reason}");
                    session.last_reason = Some(reason);
                    if session.retries < MAX_RETRIES {
                        session.retries += 1;
                        session.state = JoinState::Retrying;
                        info!(
                            "Retrying to connect to the AP ({}/{})...",
                            session.retries, MAX_RETRIES
                        );
                        JoinAction::Connect
                    } else {
                        session.state = JoinState::Failed;
                        self.outcome.signal(JoinOutcome::Failed);
                        JoinAction::None
                    }
                }
                RadioEvent::AddressAcquired => {
                    session.retries = 0;
                    session.state = JoinState::Connected;
                    self.outcome.signal(JoinOutcome::Connected);
                    JoinAction::None
                }
            }
        })
    }

    pub fn state(&self) -> JoinState {
        self.session.lock(|cell| {
            cell.borrow()
                .as_ref()
                .map_or(JoinState::Idle, |session| session.state)
        })
    }

    pub fn retries(&self) -> Option<u8> {
        self.session
            .lock(|cell| cell.borrow().as_ref().map(|session| session.retries))
    }

    /// Reason code of the most recent disconnect in this session.
    pub fn last_disconnect_reason(&self) -> Option<u32> {
        self.session
            .lock(|cell| cell.borrow().as_ref().and_then(|session| session.last_reason))
    }

    /// Credentials of the running session, for drivers that reconnect.
    pub fn credentials(&self) -> Option<SessionCredentials> {
        self.session.lock(|cell| {
            cell.borrow()
                .as_ref()
                .map(|session| session.credentials.clone())
        })
    }

    /// Drop the session. Events arriving afterwards find no session and
    /// cannot signal.
    fn end_session(&self) -> bool {
        let ended = self.session.lock(|cell| cell.borrow_mut().take()).is_some();
        self.outcome.reset();
        ended
    }
}

/// The controller's capability over a running session.
pub struct SessionHandle<'m, M: RawMutex, R: Radio> {
    machine: &'m JoinMachine<M>,
    radio: &'m mut R,
    active: bool,
}

impl<M: RawMutex, R: Radio> SessionHandle<'_, M, R> {
    /// Wait for `Connected` or `Failed`, at most `timeout`.
    ///
    /// A timeout leaves the session running; call [`stop`](Self::stop).
    pub async fn wait(&self, timeout: Duration) -> JoinOutcome {
        match with_timeout(timeout, self.machine.outcome.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "no join outcome after {} ms (state {:?})",
                    timeout.as_millis(),
                    self.machine.state()
                );
                JoinOutcome::TimedOut
            }
        }
    }

    /// Unsubscribe and release the radio. Idempotent.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if self.machine.end_session() {
            self.radio.shut_down();
            debug!("join session stopped");
        }
    }
}

impl<M: RawMutex, R: Radio> Drop for SessionHandle<'_, M, R> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration as StdDuration;

    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    use super::*;

    type Machine = JoinMachine<CriticalSectionRawMutex>;

    #[derive(Default)]
    struct FakeRadio {
        up: usize,
        down: usize,
        refuse: bool,
        last_ssid: std::string::String,
    }

    impl Radio for FakeRadio {
        type Error = &'static str;

        fn bring_up(&mut self, credentials: &SessionCredentials) -> Result<(), Self::Error> {
            if self.refuse {
                return Err("no chip");
            }
            self.up += 1;
            self.last_ssid = credentials.ssid().into();
            Ok(())
        }

        fn shut_down(&mut self) {
            self.down += 1;
        }
    }

    const CREDS: Credentials<'static> = Credentials {
        ssid: "home",
        password: "hunter22",
    };

    #[test]
    fn start_rejects_empty_credentials() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        let empty_ssid = Credentials {
            ssid: "",
            password: "x",
        };
        assert!(matches!(
            machine.start(&mut radio, empty_ssid),
            Err(CycleError::ConfigMissing("WIFI_SSID"))
        ));
        let empty_password = Credentials {
            ssid: "x",
            password: "",
        };
        assert!(matches!(
            machine.start(&mut radio, empty_password),
            Err(CycleError::ConfigMissing("WIFI_PASSWORD"))
        ));
        assert_eq!(radio.up, 0);
        assert_eq!(machine.state(), JoinState::Idle);
    }

    #[test]
    fn overlong_ssid_is_malformed() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        let creds = Credentials {
            ssid: "an-ssid-that-is-way-past-thirty-two-bytes",
            password: "x",
        };
        assert!(matches!(
            machine.start(&mut radio, creds),
            Err(CycleError::ConfigMalformed(_))
        ));
    }

    #[test]
    fn radio_refusal_fails_the_join_and_releases_the_radio() {
        let machine = Machine::new();
        let mut radio = FakeRadio {
            refuse: true,
            ..Default::default()
        };
        assert!(matches!(
            machine.start(&mut radio, CREDS),
            Err(CycleError::JoinFailed)
        ));
        assert_eq!(radio.down, 1);
        assert_eq!(machine.state(), JoinState::Idle);
    }

    #[test]
    fn station_start_requests_connect() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        let session = machine.start(&mut radio, CREDS).unwrap();
        assert_eq!(machine.state(), JoinState::Joining);
        assert_eq!(
            machine.on_event(RadioEvent::StationStarted),
            JoinAction::Connect
        );
        assert_eq!(
            machine.credentials().map(|c| c.ssid().into()),
            Some(std::string::String::from("home"))
        );
        drop(session);
        assert_eq!(radio.up, 1);
        assert_eq!(radio.last_ssid, "home");
    }

    #[test]
    fn disconnects_within_budget_retry_then_connect() {
        for disconnects in 0..=MAX_RETRIES {
            let machine = Machine::new();
            let mut radio = FakeRadio::default();
            let session = machine.start(&mut radio, CREDS).unwrap();
            machine.on_event(RadioEvent::StationStarted);
            for _ in 0..disconnects {
                assert_eq!(
                    machine.on_event(RadioEvent::Disconnected { reason: 201 }),
                    JoinAction::Connect
                );
            }
            assert_eq!(machine.retries(), Some(disconnects));
            machine.on_event(RadioEvent::AddressAcquired);
            assert_eq!(machine.retries(), Some(0));
            assert_eq!(
                block_on(session.wait(Duration::from_millis(50))),
                JoinOutcome::Connected
            );
        }
    }

    #[test]
    fn last_disconnect_reason_tracks_the_session() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        let mut session = machine.start(&mut radio, CREDS).unwrap();
        assert_eq!(machine.last_disconnect_reason(), None);
        machine.on_event(RadioEvent::StationStarted);
        machine.on_event(RadioEvent::Disconnected { reason: 201 });
        machine.on_event(RadioEvent::Disconnected { reason: 2 });
        assert_eq!(machine.last_disconnect_reason(), Some(2));
        session.stop();
        assert_eq!(machine.last_disconnect_reason(), None);
    }

    #[test]
    fn disconnect_past_budget_fails() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        let session = machine.start(&mut radio, CREDS).unwrap();
        machine.on_event(RadioEvent::StationStarted);
        for _ in 0..MAX_RETRIES {
            machine.on_event(RadioEvent::Disconnected { reason: 15 });
        }
        assert_eq!(
            machine.on_event(RadioEvent::Disconnected { reason: 15 }),
            JoinAction::None
        );
        assert_eq!(machine.state(), JoinState::Failed);
        assert_eq!(machine.retries(), Some(MAX_RETRIES));
        assert_eq!(machine.last_disconnect_reason(), Some(15));
        assert_eq!(
            block_on(session.wait(Duration::from_millis(50))),
            JoinOutcome::Failed
        );
    }

    #[test]
    fn address_supersedes_later_disconnect() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        let session = machine.start(&mut radio, CREDS).unwrap();
        machine.on_event(RadioEvent::StationStarted);
        machine.on_event(RadioEvent::AddressAcquired);
        for _ in 0..=MAX_RETRIES {
            assert_eq!(
                machine.on_event(RadioEvent::Disconnected { reason: 8 }),
                JoinAction::None
            );
        }
        assert_eq!(machine.state(), JoinState::Connected);
        assert_eq!(machine.retries(), Some(0));
        assert_eq!(
            block_on(session.wait(Duration::from_millis(50))),
            JoinOutcome::Connected
        );
    }

    #[test]
    fn signal_from_driver_thread_wakes_the_waiter() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        let session = machine.start(&mut radio, CREDS).unwrap();
        let outcome = thread::scope(|s| {
            s.spawn(|| {
                machine.on_event(RadioEvent::StationStarted);
                thread::sleep(StdDuration::from_millis(20));
                machine.on_event(RadioEvent::AddressAcquired);
            });
            block_on(session.wait(Duration::from_secs(5)))
        });
        assert_eq!(outcome, JoinOutcome::Connected);
    }

    #[test]
    fn no_terminal_signal_times_out_and_keeps_session_running() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        let mut session = machine.start(&mut radio, CREDS).unwrap();
        machine.on_event(RadioEvent::StationStarted);
        for _ in 0..MAX_RETRIES {
            machine.on_event(RadioEvent::Disconnected { reason: 201 });
        }

        let outcome = block_on(session.wait(Duration::from_millis(30)));
        assert_eq!(outcome, JoinOutcome::TimedOut);
        assert_eq!(machine.retries(), Some(MAX_RETRIES));
        assert_eq!(machine.state(), JoinState::Retrying);

        // A late address does not change what was already returned.
        machine.on_event(RadioEvent::AddressAcquired);
        assert_eq!(outcome, JoinOutcome::TimedOut);
        assert_eq!(machine.state(), JoinState::Connected);

        session.stop();
        assert_eq!(machine.state(), JoinState::Idle);
    }

    #[test]
    fn stop_is_idempotent_and_silences_events() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        {
            let mut session = machine.start(&mut radio, CREDS).unwrap();
            session.stop();
            session.stop();
            assert_eq!(
                machine.on_event(RadioEvent::AddressAcquired),
                JoinAction::None
            );
            assert_eq!(
                block_on(session.wait(Duration::from_millis(10))),
                JoinOutcome::TimedOut
            );
        }
        assert_eq!(radio.down, 1);
    }

    #[test]
    fn dropping_the_handle_stops_the_session() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        drop(machine.start(&mut radio, CREDS).unwrap());
        assert_eq!(radio.down, 1);
        assert_eq!(machine.state(), JoinState::Idle);
    }

    #[test]
    fn stale_outcome_does_not_leak_into_next_session() {
        let machine = Machine::new();
        let mut radio = FakeRadio::default();
        {
            let _session = machine.start(&mut radio, CREDS).unwrap();
            machine.on_event(RadioEvent::AddressAcquired);
        }
        let session = machine.start(&mut radio, CREDS).unwrap();
        assert_eq!(
            block_on(session.wait(Duration::from_millis(20))),
            JoinOutcome::TimedOut
        );
    }
}
