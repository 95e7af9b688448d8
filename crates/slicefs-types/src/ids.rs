strong_type!(
    /// Identifier of a mounted client session.
    SessionId,
    u64
);
