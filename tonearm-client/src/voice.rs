use async_trait::async_trait;

/// Voice-platform side of a pool transfer.
///
/// The gateway never talks to the voice platform itself. When a guild moves
/// to another pool it asks the interceptor which channel the bot sits in,
/// then to leave and rejoin it; the platform answers with a fresh voice
/// server update that must be fed back through
/// [`GatewayClient::on_voice_server_update`](crate::GatewayClient::on_voice_server_update).
#[async_trait]
pub trait VoiceInterceptor: Send + Sync {
    /// The voice channel the bot is connected to in `guild_id`, if any.
    async fn current_channel(&self, guild_id: u64) -> Option<u64>;

    async fn connect(&self, guild_id: u64, channel_id: u64);

    async fn disconnect(&self, guild_id: u64);
}
