use std::collections::VecDeque;

use stopwatch_core::ClientCommand;

/// FIFO of commands waiting for an open connection, with drop-count
/// backpressure tracking once the capacity is reached.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    commands: VecDeque<ClientCommand>,
    capacity: usize,
    drops: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub drops: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            drops: 0,
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.commands.len(),
            drops: self.drops,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Appends a command. Returns `false` if the queue was full and the
    /// command was dropped.
    pub fn push(&mut self, command: ClientCommand) -> bool {
        if self.commands.len() >= self.capacity {
            self.drops += 1;
            false
        } else {
            self.commands.push_back(command);
            true
        }
    }

    /// Returns a command that could not be transmitted to the head of the
    /// queue so it is retried before anything queued after it.
    pub fn requeue_front(&mut self, command: ClientCommand) {
        self.commands.push_front(command);
    }

    pub fn pop_front(&mut self) -> Option<ClientCommand> {
        self.commands.pop_front()
    }

    /// Empties the queue and returns how many commands were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.commands.len();
        self.commands.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_push_order() {
        let mut queue = OutboundQueue::new(8);
        queue.push(ClientCommand::Start);
        queue.push(ClientCommand::Stop);
        queue.push(ClientCommand::Reset);

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop_front()).collect();
        assert_eq!(
            drained,
            vec![ClientCommand::Start, ClientCommand::Stop, ClientCommand::Reset]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn counts_drops_past_capacity() {
        let mut queue = OutboundQueue::new(2);
        assert!(queue.push(ClientCommand::Start));
        assert!(queue.push(ClientCommand::Stop));
        assert!(!queue.push(ClientCommand::Reset));
        assert_eq!(queue.stats(), QueueStats { queued: 2, drops: 1 });
    }

    #[test]
    fn clear_reports_discarded_commands() {
        let mut queue = OutboundQueue::new(4);
        queue.push(ClientCommand::Start);
        queue.push(ClientCommand::Reset);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn requeued_command_goes_first() {
        let mut queue = OutboundQueue::new(4);
        queue.push(ClientCommand::Stop);
        let head = queue.pop_front().unwrap();
        queue.push(ClientCommand::Reset);
        queue.requeue_front(head);
        assert_eq!(queue.pop_front(), Some(ClientCommand::Stop));
        assert_eq!(queue.pop_front(), Some(ClientCommand::Reset));
    }
}
