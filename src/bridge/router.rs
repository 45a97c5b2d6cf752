//! Command router
//!
//! Maps text arriving from the outward endpoint onto bridge verbs. The
//! prefix table is a wire contract with the people typing into the endpoint:
//!
//! | input              | action                                   |
//! |--------------------|------------------------------------------|
//! | `t:<text>`         | translate zh -> en, then send as chat    |
//! | `g:<room>`         | go to room                               |
//! | `e:<action>`       | emote                                    |
//! | `s:<user> <text>`  | private message                          |
//! | `w` / `l` / `I`    | who / room list / idle listing           |
//! | `W:<room>`         | who listing of another room              |
//! | `p:<room>`         | peek into another room                   |
//! | `r:<n>`            | review the last n history lines          |
//! | `r` / `h`          | review history / remote help             |
//! | `status` (`状态`)   | local status                             |
//! | `help` (`帮助`)     | this table                               |
//! | `q`                | disconnect                               |
//! | anything else      | send verbatim as chat                    |
//!
//! Full-width colons (`t：`) are accepted too. Every input yields a
//! confirmation string; failures are rendered into it.

use std::sync::Arc;

use super::engine::BridgeHandle;
use super::service::{Lang, Translator};
use crate::error::{BridgeError, Result};

pub const HELP: &str = "🤖 combridge 命令帮助

📤 发送消息:
  t:中文内容      - 翻译成英文后发送到 COM
  e:动作          - 发送动作 (emote)
  s:用户名 消息   - 发送私信
  直接输入        - 原文发送到 COM

🏠 房间操作:
  g:房间名        - 切换到指定房间
  w               - 查看当前房间用户
  l               - 列出所有房间
  I               - 查看用户空闲时间
  W:房间名        - 查看其他房间的用户
  p:房间名        - 窥视其他房间的聊天

📜 其他命令:
  r               - 查看最近聊天记录
  r:行数          - 查看指定行数的聊天记录
  h               - 显示 COM 帮助
  status / 状态   - 查看当前状态
  help / 帮助     - 显示此帮助
  q               - 断开连接";

pub struct CommandRouter {
    handle: BridgeHandle,
    translator: Arc<dyn Translator>,
}

/// `x:payload` or `x：payload`
fn strip_command<'a>(text: &'a str, prefix: char) -> Option<&'a str> {
    let rest = text.strip_prefix(prefix)?;
    rest.strip_prefix(':').or_else(|| rest.strip_prefix('：')).map(str::trim)
}

fn malformed(message: &str) -> BridgeError {
    BridgeError::Malformed(message.to_string())
}

impl CommandRouter {
    pub fn new(handle: BridgeHandle, translator: Arc<dyn Translator>) -> Self {
        Self { handle, translator }
    }

    /// Run one line of endpoint input; never fails
    pub async fn route(&self, text: &str) -> String {
        let text = text.trim();
        match self.execute(text).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                if e.is_recoverable() {
                    tracing::info!("command {:?} failed: {}", text, e);
                } else {
                    tracing::warn!("command {:?} failed, session gone: {}", text, e);
                }
                render_error(&e)
            }
        }
    }

    async fn execute(&self, text: &str) -> Result<String> {
        if text.is_empty() {
            return Err(malformed("请输入命令或消息"));
        }

        if let Some(chinese) = strip_command(text, 't') {
            if chinese.is_empty() {
                return Err(malformed("请在 t: 后输入要翻译的中文"));
            }
            let english = self.translator.translate(chinese, Lang::Zh, Lang::En).await?;
            self.handle.send_chat(english.as_str()).await?;
            return Ok(format!("✅ 已发送翻译: {}", english));
        }

        if let Some(room) = strip_command(text, 'g') {
            if room.is_empty() {
                return Err(malformed("请在 g: 后输入房间名"));
            }
            self.handle.goto_room(room).await?;
            return Ok(format!("✅ 已切换到房间: {}", room));
        }

        if let Some(action) = strip_command(text, 'e') {
            if action.is_empty() {
                return Err(malformed("请在 e: 后输入动作"));
            }
            self.handle.emote(action).await?;
            return Ok(format!("✅ 已发送动作: {}", action));
        }

        if let Some(rest) = strip_command(text, 's') {
            let Some((user, message)) = rest.split_once(char::is_whitespace) else {
                return Err(malformed("请使用 s:用户名 消息"));
            };
            let message = message.trim();
            if user.is_empty() || message.is_empty() {
                return Err(malformed("请使用 s:用户名 消息"));
            }
            self.handle.send_private(user, message).await?;
            return Ok(format!("✅ 已私信 {}: {}", user, message));
        }

        if let Some(room) = strip_command(text, 'W') {
            if room.is_empty() {
                return Err(malformed("请在 W: 后输入房间名"));
            }
            self.handle.request_who_in(room).await?;
            return Ok(format!("✅ 已查询房间用户: {}", room));
        }

        if let Some(room) = strip_command(text, 'p') {
            if room.is_empty() {
                return Err(malformed("请在 p: 后输入房间名"));
            }
            self.handle.peek_room(room).await?;
            return Ok(format!("✅ 已查看房间: {}", room));
        }

        if let Some(count) = strip_command(text, 'r') {
            if count.is_empty() {
                return Err(malformed("请在 r: 后输入行数"));
            }
            let lines = match count.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(malformed("行数必须是正整数")),
            };
            self.handle.review_lines(lines).await?;
            return Ok(format!("✅ 已查看最近 {} 行记录", lines));
        }

        match text {
            "w" => self.handle.request_who().await?,
            "l" => self.handle.request_room_list().await?,
            "I" => self.handle.request_idle().await?,
            "r" => self.handle.review().await?,
            "h" => self.handle.help().await?,
            "status" | "状态" => return self.status().await,
            "help" | "帮助" => return Ok(HELP.to_string()),
            "q" => {
                self.handle.disconnect().await?;
                return Ok("👋 已断开连接".to_string());
            }
            _ => {
                self.handle.send_chat(text).await?;
                return Ok(format!("✅ 已发送: {}", text));
            }
        }
        Ok(format!("✅ 已执行命令: {}", text))
    }

    async fn status(&self) -> Result<String> {
        let status = self.handle.status().await?;
        let mut lines = vec![
            format!("📍 当前房间: {}", status.room),
            format!("👤 用户名: {}", status.identity),
        ];
        if let Some(command) = status.in_flight {
            lines.push(format!("⏳ 执行中: {}", command));
        }
        if status.queued > 0 {
            lines.push(format!("📨 排队命令: {}", status.queued));
        }
        if status.roster > 0 {
            lines.push(format!("👥 在线用户: {}", status.roster));
        }
        Ok(lines.join("\n"))
    }
}

fn render_error(error: &BridgeError) -> String {
    match error {
        BridgeError::Malformed(message) => format!("⚠️ {}", message),
        BridgeError::Timeout { command, after } => {
            format!("⏱️ 命令超时 ({}，{} 秒)", command, after.as_secs())
        }
        BridgeError::Translation(e) => format!("❌ 翻译失败: {}", e),
        BridgeError::Busy | BridgeError::QueueFull(_) => format!("⏳ 正忙，请稍后再试 ({})", error),
        BridgeError::Disconnected | BridgeError::Transport(_) => "🔌 未连接到 COM".to_string(),
        BridgeError::Pattern(_) => format!("❌ {}", error),
    }
}
