use crate::handlers::{Handlers, MenuButton, Reply, ReplySink};
use crate::storage::{ChatKind, Interaction};
use async_trait::async_trait;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    prelude::*,
    types::{
        CallbackQuery, Chat, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile,
        MessageId, ParseMode, User,
    },
    utils::command::BotCommands,
};
use tracing::{debug, info, warn};

type HandlerResult = anyhow::Result<()>;

/* ====== Команды ====== */
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Commands:")]
enum Command {
    #[command(description = "show the menu")]
    Start,
    #[command(description = "bot statistics (admin only)")]
    Stats,
}

/// Long polling до Ctrl-C.
pub async fn run(bot: Bot, handlers: Handlers) {
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %e, "failed to register bot commands");
    }

    let update_handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint({
                            let handlers = handlers.clone();
                            move |bot: Bot, msg: Message, cmd: Command| {
                                let handlers = handlers.clone();
                                async move { on_command(bot, msg, cmd, &handlers).await }
                            }
                        })
                )
                .branch({
                    let handlers = handlers.clone();
                    dptree::endpoint(move |bot: Bot, msg: Message| {
                        let handlers = handlers.clone();
                        async move { on_text(bot, msg, &handlers).await }
                    })
                })
        )
        .branch(
            Update::filter_callback_query().endpoint({
                let handlers = handlers.clone();
                move |bot: Bot, q: CallbackQuery| {
                    let handlers = handlers.clone();
                    async move { on_callback(bot, q, &handlers).await }
                }
            })
        );

    info!("bot is running");
    Dispatcher::builder(bot, update_handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    info!("dispatcher stopped");
}

async fn on_command(bot: Bot, msg: Message, cmd: Command, handlers: &Handlers) -> HandlerResult {
    let sink = TelegramSink::new(bot, msg.chat.id);
    match cmd {
        Command::Start => {
            let interaction = msg.from.as_ref().map(|u| interaction_from(u, &msg.chat));
            handlers.on_start(&sink, interaction.as_ref()).await
        }
        Command::Stats => {
            let caller = msg.from.as_ref().map(user_id);
            handlers.on_stats(&sink, caller).await
        }
    }
}

/* ====== Поиск по тексту ====== */
async fn on_text(bot: Bot, msg: Message, handlers: &Handlers) -> HandlerResult {
    let Some(text) = msg.text() else { return Ok(()); };
    // незнакомые команды не ищем
    if text.starts_with('/') {
        debug!(text, "ignoring unknown command");
        return Ok(());
    }
    let Some(user) = msg.from.as_ref() else { return Ok(()); };
    let sink = TelegramSink::new(bot, msg.chat.id);
    handlers.on_text(&sink, user_id(user), text).await
}

/* ====== Callback-кнопки ====== */
async fn on_callback(bot: Bot, q: CallbackQuery, handlers: &Handlers) -> HandlerResult {
    bot.answer_callback_query(q.id.clone()).await?;

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let sink = TelegramSink::new(bot, message.chat().id).editing(message.id());
    handlers.on_button(&sink, data).await
}

fn user_id(user: &User) -> i64 {
    user.id.0 as i64
}

fn interaction_from(user: &User, chat: &Chat) -> Interaction {
    let display_name = user.username.clone().unwrap_or_else(|| user.first_name.clone());
    let kind = if chat.is_private() {
        ChatKind::Private
    } else if chat.is_channel() {
        ChatKind::Channel
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else {
        ChatKind::Group
    };
    Interaction::in_chat(user_id(user), display_name, chat.id.0, kind, chat.title().map(str::to_string))
}

fn menu_keyboard() -> InlineKeyboardMarkup {
    let button = |b: MenuButton| InlineKeyboardButton::callback(b.label(), b.data());
    InlineKeyboardMarkup::new(vec![
        vec![button(MenuButton::Movies), button(MenuButton::Series)],
        vec![button(MenuButton::Trending)],
    ])
}

/* ====== Отправка ответов в Telegram ====== */
struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
    // сообщение с нажатой кнопкой (для EditText)
    message_id: Option<MessageId>,
}

impl TelegramSink {
    fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id, message_id: None }
    }

    fn editing(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }
}

#[async_trait]
impl ReplySink for TelegramSink {
    async fn deliver(&self, reply: Reply) -> anyhow::Result<()> {
        match reply {
            Reply::Text(text) => {
                self.bot.send_message(self.chat_id, text).await?;
            }
            Reply::Html(text) => {
                self.bot.send_message(self.chat_id, text).parse_mode(ParseMode::Html).await?;
            }
            Reply::Menu(text) => {
                self.bot
                    .send_message(self.chat_id, text)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(menu_keyboard())
                    .await?;
            }
            Reply::Photo(url) => {
                self.bot.send_photo(self.chat_id, InputFile::url(url.parse()?)).await?;
            }
            Reply::EditText(text) => match self.message_id {
                Some(id) => {
                    self.bot.edit_message_text(self.chat_id, id, text).await?;
                }
                None => {
                    self.bot.send_message(self.chat_id, text).await?;
                }
            },
        }
        Ok(())
    }
}
