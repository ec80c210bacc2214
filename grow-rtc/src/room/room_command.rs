/// Commands the [`RoomHandle`](crate::room::RoomHandle) sends into the session
/// loop.
#[derive(Debug)]
pub enum RoomCommand {
    /// Tear the session down: close the connection, stop local tracks,
    /// disconnect the channel.
    Leave,
}
