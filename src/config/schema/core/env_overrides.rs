use super::Config;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CHECKIN_RELAY_URL")
            && !url.is_empty()
        {
            self.relay_url = url;
        }

        if let Ok(secret) = std::env::var("CHECKIN_RELAY_SECRET")
            && !secret.is_empty()
        {
            self.signing_secret = Some(secret);
        }

        if let Ok(identity) = std::env::var("CHECKIN_RELAY_IDENTITY")
            && !identity.is_empty()
        {
            self.client.identity = identity;
        }

        if let Ok(host) = std::env::var("CHECKIN_RELAY_HOST")
            && !host.is_empty()
        {
            self.relay.host = host;
        }

        if let Ok(port_str) = std::env::var("CHECKIN_RELAY_PORT")
            && let Ok(port) = port_str.parse::<u16>()
        {
            self.relay.port = port;
        }
    }
}
