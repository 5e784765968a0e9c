use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::event::Command;

/// A reducer command for the shell to carry out. Its outcome comes back as
/// an ordinary [`Event`](crate::Event) dispatched into the core.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HostOperation(pub Command);

impl Operation for HostOperation {
    type Output = ();
}

/// Hands the commands queued by [`Model::update`](crate::Model::update) to
/// the shell, one effect per command, in the order they were queued.
pub struct Host<Ev> {
    context: CapabilityContext<HostOperation, Ev>,
}

impl<Ev> Clone for Host<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Host<Ev> {
    type Operation = HostOperation;
    type MappedSelf<MappedEv> = Host<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Host::new(self.context.map_event(f))
    }
}

impl<Ev> Host<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<HostOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn execute(&self, command: Command) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(HostOperation(command)).await;
        });
    }
}
