use crate::{
    config::SyncConfig,
    types::{DesiredState, SocketCommand, SocketId, SocketState, SOCKET_COUNT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalChange {
    pub previous_secs: u64,
    pub current_secs: u64,
}

/// Outcome of diffing one remote snapshot against the tracked socket state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Commands in transmission order: per-socket diffs, then the forced resync.
    pub commands: Vec<SocketCommand>,
    pub changed: Vec<SocketId>,
    pub interval_change: Option<IntervalChange>,
    pub rejected_interval: Option<i64>,
    pub clear_force_flag: bool,
}

impl ReconcilePlan {
    pub fn is_changed(&self) -> bool {
        !self.changed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    sockets: [SocketState; SOCKET_COUNT],
    poll_interval_secs: u64,
    min_poll_interval_secs: u64,
}

impl ReconciliationEngine {
    pub fn new(config: &SyncConfig) -> Self {
        let min_poll_interval_secs = config.min_poll_interval_secs.max(1);
        Self {
            sockets: std::array::from_fn(|index| SocketState::initial(SocketId::from_index(index))),
            poll_interval_secs: config
                .default_poll_interval_secs
                .max(min_poll_interval_secs),
            min_poll_interval_secs,
        }
    }

    pub fn sockets(&self) -> &[SocketState; SOCKET_COUNT] {
        &self.sockets
    }

    pub fn actual(&self, id: SocketId) -> bool {
        self.sockets[id.index()].actual
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    /// Applies a decoded remote snapshot.
    ///
    /// Sockets whose desired value differs from the tracked actual value are
    /// updated; a command is emitted for each only when `issue_changes` is set.
    /// A set force flag appends one command per socket carrying the current
    /// actual value, independent of the diff.
    pub fn apply(&mut self, desired: &DesiredState, issue_changes: bool) -> ReconcilePlan {
        let mut plan = ReconcilePlan::default();

        for socket in self.sockets.iter_mut() {
            let wanted = desired.socket(socket.id);
            socket.desired = wanted;
            if socket.actual == wanted {
                continue;
            }

            socket.actual = wanted;
            plan.changed.push(socket.id);
            if issue_changes {
                plan.commands.push(SocketCommand::new(socket.id, wanted));
            }
        }

        if let Some(remote) = desired.sync_interval_secs {
            self.update_interval(remote, &mut plan);
        }

        if desired.force_update {
            plan.commands.extend(self.resync_commands());
            plan.clear_force_flag = true;
        }

        plan
    }

    pub fn resync_commands(&self) -> impl Iterator<Item = SocketCommand> + '_ {
        self.sockets
            .iter()
            .map(|socket| SocketCommand::new(socket.id, socket.actual))
    }

    fn update_interval(&mut self, remote: i64, plan: &mut ReconcilePlan) {
        let Ok(remote) = u64::try_from(remote) else {
            plan.rejected_interval = Some(remote);
            return;
        };
        if remote < self.min_poll_interval_secs {
            plan.rejected_interval = Some(remote as i64);
            return;
        }
        if remote != self.poll_interval_secs {
            plan.interval_change = Some(IntervalChange {
                previous_secs: self.poll_interval_secs,
                current_secs: remote,
            });
            self.poll_interval_secs = remote;
        }
    }
}
